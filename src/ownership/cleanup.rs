use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::channels::ExecutionChannels;
use super::registry::OwnershipRegistry;
use crate::cluster::stats::JobStatsCache;
use crate::error::Result;
use crate::store::JobStore;
use crate::tasks::PeriodicTask;

/// Releases what a node holds for a finished execution.
///
/// The job row keeps its owning follower as an audit trail; only the
/// subscriptions, the in-memory record and the cleanup flag change.
pub struct OwnershipCleanup {
    node_id: String,
    jobs: Arc<dyn JobStore>,
    registry: Arc<OwnershipRegistry>,
    channels: Arc<ExecutionChannels>,
    stats: Arc<JobStatsCache>,
    batch_size: usize,
    interval: Duration,
}

impl OwnershipCleanup {
    pub fn new(
        node_id: impl Into<String>,
        jobs: Arc<dyn JobStore>,
        registry: Arc<OwnershipRegistry>,
        channels: Arc<ExecutionChannels>,
        stats: Arc<JobStatsCache>,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            jobs,
            registry,
            channels,
            stats,
            batch_size,
            interval,
        }
    }

    pub async fn cleanup(&self, job_id: Uuid, execution_id: Uuid) -> Result<()> {
        self.channels.unsubscribe(execution_id).await?;
        self.registry.release_execution(job_id, execution_id);
        self.stats.set_owned(self.registry.len() as u64);
        self.jobs.mark_channels_cleaned(job_id).await?;
        tracing::debug!(job_id = %job_id, execution_id = %execution_id, "Released job ownership");
        Ok(())
    }

    /// Clean up finished jobs of this node whose cleanup never ran, for
    /// example because the node restarted mid-execution.
    pub async fn sweep(&self, shutdown: &CancellationToken) -> Result<usize> {
        let mut cleaned = 0;
        for job in self.jobs.get_jobs_needing_cleanup(self.batch_size).await? {
            if shutdown.is_cancelled() {
                break;
            }
            if job.follower_node_id.as_deref() != Some(self.node_id.as_str()) {
                continue;
            }

            let result = match job.execution_id {
                Some(execution_id) => self.cleanup(job.id, execution_id).await,
                None => self.jobs.mark_channels_cleaned(job.id).await.map(|_| ()),
            };
            match result {
                Ok(()) => cleaned += 1,
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Cleanup sweep failed for job"),
            }
        }

        if cleaned > 0 {
            tracing::info!(cleaned, "Swept finished jobs");
        }
        Ok(cleaned)
    }
}

#[async_trait]
impl PeriodicTask for OwnershipCleanup {
    fn name(&self) -> &'static str {
        "ownership-sweep"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, shutdown: &CancellationToken) -> Result<()> {
        self.sweep(shutdown).await.map(|_| ())
    }
}
