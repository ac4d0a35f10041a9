use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Dispatched,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Dispatched => 1,
            JobStatus::Running => 2,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 3,
        }
    }

    /// Whether a status report may move a job from `self` to `next`.
    ///
    /// Status only moves forward. Re-applying the current non-terminal status
    /// is allowed so redelivered reports stay harmless. Failed back to Pending
    /// happens only through a retry, never through a status report.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Dispatched => write!(f, "dispatched"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Kind of schedule that produced a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    Cron,
    Interval,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Cron => write!(f, "Cron"),
            ScheduleType::Interval => write!(f, "Interval"),
        }
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub queue: String,
    /// Serialized handler arguments, opaque to the coordinator
    pub arguments: String,
    pub status: JobStatus,
    pub priority: i32,
    pub correlation_id: Option<String>,
    pub schedule_id: Option<Uuid>,
    pub schedule_type: Option<ScheduleType>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout: Option<Duration>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub worker_id: Option<String>,
    /// Coordinator node that won the claim race for the current attempt
    pub follower_node_id: Option<String>,
    /// Identifier of the current dispatch attempt
    pub execution_id: Option<Uuid>,
    /// Set once the owning follower has torn down the execution's channels
    pub channels_cleaned: bool,
    /// Bumped on every write; conditional writes compare against it
    pub version: u64,
}

impl Job {
    pub fn new(
        job_type: impl Into<String>,
        queue: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            queue: queue.into(),
            arguments: arguments.into(),
            status: JobStatus::Pending,
            priority: 0,
            correlation_id: None,
            schedule_id: None,
            schedule_type: None,
            created_at: Utc::now(),
            scheduled_at: None,
            dispatched_at: None,
            started_at: None,
            completed_at: None,
            timeout: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error: None,
            worker_id: None,
            follower_node_id: None,
            execution_id: None,
            channels_cleaned: false,
            version: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Ready to dispatch: pending and not scheduled into the future.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at.map_or(true, |at| at <= now)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Archive of a job that ran out of retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub original_job_id: Uuid,
    pub job_type: String,
    pub queue: String,
    pub arguments: String,
    pub last_error: Option<String>,
    pub total_attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_job(job: &Job, failed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_job_id: job.id,
            job_type: job.job_type.clone(),
            queue: job.queue.clone(),
            arguments: job.arguments.clone(),
            last_error: job.error.clone(),
            total_attempts: job.retry_count + 1,
            failed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

/// A single log line emitted by a worker while executing a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub execution_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
