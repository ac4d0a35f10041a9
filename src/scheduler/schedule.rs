use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::ScheduleType;

/// Common view of a recurring job definition used by the due check and the
/// planner.
pub trait Recurring {
    fn schedule_id(&self) -> Uuid;
    fn schedule_type(&self) -> ScheduleType;
    fn enabled(&self) -> bool;
    fn next_run_time(&self) -> Option<DateTime<Utc>>;
    fn job_type(&self) -> &str;
    fn queue(&self) -> &str;
    fn arguments(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    pub id: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub job_type: String,
    pub queue: String,
    pub arguments: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub enabled: bool,
    /// IANA timezone name the expression is evaluated in
    pub timezone: String,
}

impl CronSchedule {
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        job_type: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cron_expression: cron_expression.into(),
            job_type: job_type.into(),
            queue: queue.into(),
            arguments: "{}".to_string(),
            next_run_time: None,
            last_run_time: None,
            enabled: true,
            timezone: "UTC".to_string(),
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    pub fn with_next_run(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_time = Some(at);
        self
    }
}

impl Recurring for CronSchedule {
    fn schedule_id(&self) -> Uuid {
        self.id
    }

    fn schedule_type(&self) -> ScheduleType {
        ScheduleType::Cron
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.next_run_time
    }

    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    fn arguments(&self) -> &str {
        &self.arguments
    }
}

/// Fixed-period schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalSchedule {
    pub id: Uuid,
    pub name: String,
    pub interval: Duration,
    pub job_type: String,
    pub queue: String,
    pub arguments: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl IntervalSchedule {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        job_type: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            interval,
            job_type: job_type.into(),
            queue: queue.into(),
            arguments: "{}".to_string(),
            next_run_time: None,
            last_run_time: None,
            enabled: true,
        }
    }

    pub fn with_next_run(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_time = Some(at);
        self
    }
}

impl Recurring for IntervalSchedule {
    fn schedule_id(&self) -> Uuid {
        self.id
    }

    fn schedule_type(&self) -> ScheduleType {
        ScheduleType::Interval
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.next_run_time
    }

    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    fn arguments(&self) -> &str {
        &self.arguments
    }
}
