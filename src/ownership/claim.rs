use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::channels::ExecutionChannels;
use super::processor::JobEventProcessor;
use super::registry::{JobOwnershipInfo, OwnershipRegistry};
use crate::cache::CacheInvalidator;
use crate::cluster::stats::JobStatsCache;
use crate::error::Result;
use crate::store::JobStore;
use crate::transport::channels::FOLLOWERS_GROUP;
use crate::transport::messages::JobDispatchedEvent;
use crate::transport::{consume, Channels, Flow, Transport};

/// Races the other followers for each dispatched job.
pub struct AssignmentSubscriber {
    node_id: String,
    jobs: Arc<dyn JobStore>,
    transport: Arc<dyn Transport>,
    channels: Channels,
    registry: Arc<OwnershipRegistry>,
    execution_channels: Arc<ExecutionChannels>,
    processor: Arc<JobEventProcessor>,
    cache: Arc<dyn CacheInvalidator>,
    stats: Arc<JobStatsCache>,
}

impl AssignmentSubscriber {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        jobs: Arc<dyn JobStore>,
        transport: Arc<dyn Transport>,
        channels: Channels,
        registry: Arc<OwnershipRegistry>,
        execution_channels: Arc<ExecutionChannels>,
        processor: Arc<JobEventProcessor>,
        cache: Arc<dyn CacheInvalidator>,
        stats: Arc<JobStatsCache>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            jobs,
            transport,
            channels,
            registry,
            execution_channels,
            processor,
            cache,
            stats,
        }
    }

    /// Join the followers group and process assignment events until
    /// `shutdown` fires.
    ///
    /// Failing to join the group is fatal for this task and is returned to
    /// the caller; errors while handling single events are logged.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let subscription = self
            .transport
            .subscribe_with_group(&self.channels.job_dispatched(), FOLLOWERS_GROUP, &self.node_id)
            .await?;
        tracing::info!(node_id = %self.node_id, "Listening for job assignments");

        let handler_shutdown = shutdown.clone();
        consume(subscription, shutdown, move |event: JobDispatchedEvent| {
            let this = self.clone();
            let shutdown = handler_shutdown.clone();
            async move {
                if let Err(e) = this.handle_assignment(event.clone(), &shutdown).await {
                    tracing::warn!(job_id = %event.job_id, error = %e, "Failed to handle job assignment");
                }
                Flow::Continue
            }
        })
        .await;
        Ok(())
    }

    /// Try to claim the job in `event`. Returns whether this node won.
    pub async fn handle_assignment(
        &self,
        event: JobDispatchedEvent,
        shutdown: &CancellationToken,
    ) -> Result<bool> {
        if !self
            .jobs
            .try_claim(event.job_id, event.execution_id, &self.node_id)
            .await?
        {
            tracing::debug!(
                node_id = %self.node_id,
                job_id = %event.job_id,
                execution_id = %event.execution_id,
                "Lost claim race or assignment is stale"
            );
            return Ok(false);
        }

        self.registry.claim(JobOwnershipInfo {
            job_id: event.job_id,
            node_id: self.node_id.clone(),
            execution_id: event.execution_id,
            claimed_at: Utc::now(),
        });
        self.stats.set_owned(self.registry.len() as u64);
        self.cache.invalidate_job(event.job_id).await;

        self.execution_channels
            .subscribe(event.execution_id, self.processor.clone(), shutdown)
            .await?;

        tracing::info!(
            node_id = %self.node_id,
            job_id = %event.job_id,
            execution_id = %event.execution_id,
            queue = %event.queue,
            "Claimed job"
        );
        Ok(true)
    }
}
