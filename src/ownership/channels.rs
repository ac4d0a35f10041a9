use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::processor::JobEventProcessor;
use crate::error::Result;
use crate::transport::messages::{JobLogMessage, JobStatusMessage};
use crate::transport::{consume, Channels, Transport};

/// Status and log subscriptions for the executions this node owns.
///
/// Channels are keyed by execution id, so a retried job gets fresh channels
/// and nothing from an earlier attempt leaks into the new one.
pub struct ExecutionChannels {
    transport: Arc<dyn Transport>,
    channels: Channels,
    active: DashMap<Uuid, CancellationToken>,
}

impl ExecutionChannels {
    pub fn new(transport: Arc<dyn Transport>, channels: Channels) -> Self {
        Self {
            transport,
            channels,
            active: DashMap::new(),
        }
    }

    /// Subscribe to both channels of `execution_id` and feed them to
    /// `processor` until the execution finishes or `shutdown` fires.
    pub async fn subscribe(
        &self,
        execution_id: Uuid,
        processor: Arc<JobEventProcessor>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        if self.active.contains_key(&execution_id) {
            return Ok(());
        }

        let status = self
            .transport
            .subscribe(&self.channels.job_status(execution_id))
            .await?;
        let log = match self
            .transport
            .subscribe(&self.channels.job_log(execution_id))
            .await
        {
            Ok(log) => log,
            Err(e) => {
                let _ = self
                    .transport
                    .unsubscribe(&self.channels.job_status(execution_id))
                    .await;
                return Err(e);
            }
        };

        let token = shutdown.child_token();
        self.active.insert(execution_id, token.clone());

        let status_processor = processor.clone();
        tokio::spawn(consume(
            status,
            token.clone(),
            move |message: JobStatusMessage| {
                let processor = status_processor.clone();
                async move { processor.handle_status(message).await }
            },
        ));
        tokio::spawn(consume(log, token, move |message: JobLogMessage| {
            let processor = processor.clone();
            async move { processor.handle_log(message).await }
        }));

        tracing::debug!(execution_id = %execution_id, "Subscribed to execution channels");
        Ok(())
    }

    /// Tear down both channels of `execution_id`. Safe to call more than once.
    pub async fn unsubscribe(&self, execution_id: Uuid) -> Result<()> {
        if let Some((_, token)) = self.active.remove(&execution_id) {
            token.cancel();
        }
        self.transport
            .unsubscribe(&self.channels.job_status(execution_id))
            .await?;
        self.transport
            .unsubscribe(&self.channels.job_log(execution_id))
            .await?;
        tracing::debug!(execution_id = %execution_id, "Unsubscribed from execution channels");
        Ok(())
    }

    pub fn is_subscribed(&self, execution_id: Uuid) -> bool {
        self.active.contains_key(&execution_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
