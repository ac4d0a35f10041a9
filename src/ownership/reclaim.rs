use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::election::LeadershipFlag;
use crate::error::Result;
use crate::scheduler::job::Job;
use crate::store::JobStore;
use crate::tasks::PeriodicTask;
use crate::transport::messages::JobDispatchedEvent;
use crate::transport::{publish_message, Channels, Transport};

/// Hands the unfinished jobs of a departed follower back to the claim race.
pub struct JobReclaimer {
    jobs: Arc<dyn JobStore>,
    transport: Arc<dyn Transport>,
    channels: Channels,
}

impl JobReclaimer {
    pub fn new(jobs: Arc<dyn JobStore>, transport: Arc<dyn Transport>, channels: Channels) -> Self {
        Self {
            jobs,
            transport,
            channels,
        }
    }

    /// Clear `node_id` as owner of its non-terminal jobs and re-announce each
    /// dispatched one so a live follower claims it. Returns the number of
    /// jobs released.
    ///
    /// A job whose announcement fails stays unowned; [`UnclaimedJobScanner`]
    /// announces it again once its grace period has passed.
    pub async fn reclaim(&self, node_id: &str) -> Result<usize> {
        let released = self.jobs.release_jobs_from_follower(node_id).await?;

        for job in &released {
            if let Err(e) = self.announce(job).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to re-announce released job");
            }
        }

        if !released.is_empty() {
            tracing::warn!(node_id, released = released.len(), "Released jobs of departed follower");
        }
        Ok(released.len())
    }

    /// Publish an assignment event for the job's current execution. Jobs that
    /// were never dispatched have nothing to claim and are skipped.
    pub async fn announce(&self, job: &Job) -> Result<bool> {
        let Some(execution_id) = job.execution_id else {
            return Ok(false);
        };
        let event = JobDispatchedEvent {
            job_id: job.id,
            execution_id,
            queue: job.queue.clone(),
            timestamp: Utc::now(),
        };
        publish_message(
            self.transport.as_ref(),
            &self.channels.job_dispatched(),
            &event,
        )
        .await?;
        Ok(true)
    }
}

/// Leader-only pass that re-announces dispatched jobs nobody has claimed.
///
/// Covers assignment events that never reached a follower: a broadcast lost
/// with a crashed group member, or a re-announce that failed to publish.
pub struct UnclaimedJobScanner {
    jobs: Arc<dyn JobStore>,
    reclaimer: Arc<JobReclaimer>,
    leadership: LeadershipFlag,
    grace: Duration,
    batch_size: usize,
    interval: Duration,
}

impl UnclaimedJobScanner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        reclaimer: Arc<JobReclaimer>,
        leadership: LeadershipFlag,
        grace: Duration,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            reclaimer,
            leadership,
            grace,
            batch_size,
            interval,
        }
    }

    /// Returns the number of jobs announced again.
    pub async fn scan(&self, shutdown: &CancellationToken) -> Result<usize> {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - grace;

        let mut announced = 0;
        for job in self.jobs.get_unclaimed(cutoff, self.batch_size).await? {
            if shutdown.is_cancelled() {
                break;
            }
            match self.reclaimer.announce(&job).await {
                Ok(true) => announced += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Failed to re-announce unclaimed job"),
            }
        }

        if announced > 0 {
            tracing::warn!(announced, "Re-announced unclaimed jobs");
        }
        Ok(announced)
    }
}

#[async_trait]
impl PeriodicTask for UnclaimedJobScanner {
    fn name(&self) -> &'static str {
        "unclaimed-job-scanner"
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
