use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::{DeadLetter, JobStatus};
use crate::config::RetryBackoff;
use crate::election::LeadershipFlag;
use crate::error::Result;
use crate::store::{DeadLetterStore, JobStore};
use crate::tasks::PeriodicTask;

/// Archive a failed job that has no retries left and remove it from the job
/// store.
///
/// Returns `None` when the job is missing, not failed, or still has retries.
/// Archiving is idempotent per job, so a leader that crashed between archive
/// and removal finishes the removal on the next pass.
pub async fn move_to_dead_letter(
    jobs: &dyn JobStore,
    dead_letters: &dyn DeadLetterStore,
    job_id: Uuid,
) -> Result<Option<DeadLetter>> {
    let Some(job) = jobs.get(job_id).await? else {
        return Ok(None);
    };
    if job.status != JobStatus::Failed || !job.retries_exhausted() {
        return Ok(None);
    }

    let letter = DeadLetter::from_job(&job, job.completed_at.unwrap_or_else(Utc::now));
    if !dead_letters.archive(letter.clone()).await? {
        tracing::debug!(job_id = %job.id, "Dead letter already archived");
    }

    if !jobs.remove_if_version(job.id, job.version).await? {
        tracing::debug!(job_id = %job.id, "Job changed before it could be removed");
        return Ok(None);
    }

    tracing::warn!(
        job_id = %job.id,
        job_type = %job.job_type,
        attempts = letter.total_attempts,
        error = job.error.as_deref().unwrap_or(""),
        "Job moved to dead letter"
    );
    Ok(Some(letter))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryScanSummary {
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Leader-only pass over failed jobs: retry with backoff while attempts
/// remain, dead-letter the rest.
pub struct RetryScanner {
    jobs: Arc<dyn JobStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    backoff: RetryBackoff,
    leadership: LeadershipFlag,
    batch_size: usize,
    interval: Duration,
}

impl RetryScanner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        backoff: RetryBackoff,
        leadership: LeadershipFlag,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            dead_letters,
            backoff,
            leadership,
            batch_size,
            interval,
        }
    }

    pub async fn scan(&self, shutdown: &CancellationToken) -> Result<RetryScanSummary> {
        let mut summary = RetryScanSummary::default();
        let failed = self
            .jobs
            .get_by_status(JobStatus::Failed, self.batch_size)
            .await?;

        for job in failed {
            if shutdown.is_cancelled() {
                break;
            }

            let outcome = if job.retries_exhausted() {
                move_to_dead_letter(self.jobs.as_ref(), self.dead_letters.as_ref(), job.id)
                    .await
                    .map(|letter| {
                        if letter.is_some() {
                            summary.dead_lettered += 1;
                        }
                    })
            } else {
                let delay = self.backoff.delay_for(job.retry_count + 1);
                let run_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|delay| Utc::now().checked_add_signed(delay));
                self.jobs.try_retry(job.id, run_at).await.map(|retried| {
                    if retried {
                        summary.retried += 1;
                        tracing::info!(
                            job_id = %job.id,
                            attempt = job.retry_count + 1,
                            max_retries = job.max_retries,
                            delay = ?delay,
                            "Scheduled job retry"
                        );
                    }
                })
            };

            if let Err(e) = outcome {
                tracing::error!(job_id = %job.id, error = %e, "Failed to process failed job");
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl PeriodicTask for RetryScanner {
    fn name(&self) -> &'static str {
        "retry-scanner"
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
