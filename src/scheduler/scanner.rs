use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::dispatcher::JobDispatcher;
use super::evaluator;
use super::planner::JobPlanner;
use crate::cluster::stats::JobStatsCache;
use crate::election::LeadershipFlag;
use crate::error::Result;
use crate::store::{CronScheduleStore, IntervalScheduleStore, JobStore};
use crate::tasks::PeriodicTask;

/// Leader-only pass over due cron and interval schedules.
pub struct ScheduleScanner {
    cron_schedules: Arc<dyn CronScheduleStore>,
    interval_schedules: Arc<dyn IntervalScheduleStore>,
    planner: Arc<JobPlanner>,
    leadership: LeadershipFlag,
    interval: Duration,
}

impl ScheduleScanner {
    pub fn new(
        cron_schedules: Arc<dyn CronScheduleStore>,
        interval_schedules: Arc<dyn IntervalScheduleStore>,
        planner: Arc<JobPlanner>,
        leadership: LeadershipFlag,
        interval: Duration,
    ) -> Self {
        Self {
            cron_schedules,
            interval_schedules,
            planner,
            leadership,
            interval,
        }
    }

    /// Plan every due schedule. Returns the number of jobs enqueued.
    ///
    /// A schedule that fails to plan is logged and skipped; it stays due and
    /// is retried on the next scan.
    pub async fn scan(&self, shutdown: &CancellationToken) -> Result<usize> {
        let now = Utc::now();
        let mut planned = 0;

        for schedule in self.cron_schedules.get_due(now).await? {
            if shutdown.is_cancelled() {
                return Ok(planned);
            }
            if !evaluator::is_due(&schedule, now) {
                continue;
            }
            match self.planner.plan_cron(&schedule, now).await {
                Ok(_) => planned += 1,
                Err(e) => {
                    tracing::error!(schedule_id = %schedule.id, name = %schedule.name, error = %e, "Failed to plan cron schedule")
                }
            }
        }

        for schedule in self.interval_schedules.get_due(now).await? {
            if shutdown.is_cancelled() {
                return Ok(planned);
            }
            if !evaluator::is_due(&schedule, now) {
                continue;
            }
            match self.planner.plan_interval(&schedule, now).await {
                Ok(_) => planned += 1,
                Err(e) => {
                    tracing::error!(schedule_id = %schedule.id, name = %schedule.name, error = %e, "Failed to plan interval schedule")
                }
            }
        }

        if planned > 0 {
            tracing::debug!(planned, "Schedule scan complete");
        }
        Ok(planned)
    }
}

#[async_trait]
impl PeriodicTask for ScheduleScanner {
    fn name(&self) -> &'static str {
        "schedule-scanner"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn should_run(&self) -> bool {
        self.leadership.is_leader()
    }

    async fn tick(&self, shutdown: &CancellationToken) -> Result<()> {
        self.scan(shutdown).await.map(|_| ())
    }
}

/// Leader-only pass over ready pending jobs, at most one batch per tick.
pub struct JobQueueScanner {
    jobs: Arc<dyn JobStore>,
    dispatcher: Arc<JobDispatcher>,
    stats: Arc<JobStatsCache>,
    leadership: LeadershipFlag,
    batch_size: usize,
    interval: Duration,
}

impl JobQueueScanner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        dispatcher: Arc<JobDispatcher>,
        stats: Arc<JobStatsCache>,
        leadership: LeadershipFlag,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            dispatcher,
            stats,
            leadership,
            batch_size,
            interval,
        }
    }

    /// Dispatch up to one batch. Returns the number of jobs dispatched.
    pub async fn scan(&self, shutdown: &CancellationToken) -> Result<usize> {
        let batch = self.jobs.get_pending(self.batch_size).await?;
        self.stats.set_queued(batch.len() as u64);

        let mut dispatched = 0;
        for job in &batch {
            if shutdown.is_cancelled() {
                break;
            }
            match self.dispatcher.dispatch(job).await {
                Ok(Some(_)) => dispatched += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(job_id = %job.id, queue = %job.queue, error = %e, "Failed to dispatch job")
                }
            }
        }

        if dispatched > 0 {
            tracing::debug!(dispatched, batch = batch.len(), "Job queue scan complete");
        }
        Ok(dispatched)
    }
}

#[async_trait]
impl PeriodicTask for JobQueueScanner {
    fn name(&self) -> &'static str {
        "job-queue-scanner"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn should_run(&self) -> bool {
        self.leadership.is_leader()
    }

    async fn tick(&self, shutdown: &CancellationToken) -> Result<()> {
        self.scan(shutdown).await.map(|_| ())
    }
}
