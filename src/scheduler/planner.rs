use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::evaluator;
use super::job::Job;
use super::schedule::{CronSchedule, IntervalSchedule, Recurring};
use crate::error::Result;
use crate::store::{CronScheduleStore, IntervalScheduleStore, JobStore};

/// Turns due schedules into pending jobs and advances their next run time.
///
/// Enqueue and schedule advance are two separate writes. A crash between them
/// leaves the schedule due and the next leader plans it again, so a planning
/// round is at-least-once.
pub struct JobPlanner {
    jobs: Arc<dyn JobStore>,
    cron_schedules: Arc<dyn CronScheduleStore>,
    interval_schedules: Arc<dyn IntervalScheduleStore>,
}

impl JobPlanner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        cron_schedules: Arc<dyn CronScheduleStore>,
        interval_schedules: Arc<dyn IntervalScheduleStore>,
    ) -> Self {
        Self {
            jobs,
            cron_schedules,
            interval_schedules,
        }
    }

    pub async fn plan_cron(&self, schedule: &CronSchedule, now: DateTime<Utc>) -> Result<Job> {
        let job = self.enqueue_for(schedule, now).await?;

        let next_run =
            evaluator::next_occurrence(&schedule.cron_expression, now, &schedule.timezone);
        if next_run.is_none() {
            tracing::warn!(
                schedule_id = %schedule.id,
                expression = %schedule.cron_expression,
                "Cron schedule has no next run and will not fire again"
            );
        }
        self.cron_schedules
            .update_run_times(schedule.id, next_run, now)
            .await?;

        Ok(job)
    }

    pub async fn plan_interval(
        &self,
        schedule: &IntervalSchedule,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let job = self.enqueue_for(schedule, now).await?;

        let next_run = evaluator::next_interval_run(schedule.interval, now);
        if next_run.is_none() {
            tracing::warn!(schedule_id = %schedule.id, "Interval schedule will not fire again");
        }
        self.interval_schedules
            .update_run_times(schedule.id, next_run, now)
            .await?;

        Ok(job)
    }

    async fn enqueue_for<S: Recurring + Sync>(
        &self,
        schedule: &S,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let mut job = Job::new(schedule.job_type(), schedule.queue(), schedule.arguments());
        job.schedule_id = Some(schedule.schedule_id());
        job.schedule_type = Some(schedule.schedule_type());
        job.created_at = now;
        job.scheduled_at = schedule.next_run_time();

        let job = self.jobs.enqueue(job).await?;
        tracing::info!(
            job_id = %job.id,
            schedule_id = %schedule.schedule_id(),
            schedule_type = %schedule.schedule_type(),
            queue = %job.queue,
            "Planned job from schedule"
        );
        Ok(job)
    }
}
