use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::model::{Worker, WorkerStatus};
use crate::config::WorkerDefaults;
use crate::error::Result;
use crate::store::WorkerStore;
use crate::transport::channels::COORDINATORS_GROUP;
use crate::transport::messages::{
    WorkerConfigMessage, WorkerHeartbeatMessage, WorkerJoinMessage, WorkerShutdownMessage,
};
use crate::transport::{consume, publish_message, Channels, Flow, Transport};

/// Coordinator side of the worker lifecycle: join, heartbeat and shutdown.
///
/// All coordinators share one consumer group per channel, so each worker
/// message is handled by exactly one of them.
pub struct WorkerRegistry {
    node_id: String,
    workers: Arc<dyn WorkerStore>,
    transport: Arc<dyn Transport>,
    channels: Channels,
    defaults: WorkerDefaults,
}

impl WorkerRegistry {
    pub fn new(
        node_id: impl Into<String>,
        workers: Arc<dyn WorkerStore>,
        transport: Arc<dyn Transport>,
        channels: Channels,
        defaults: WorkerDefaults,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            workers,
            transport,
            channels,
            defaults,
        }
    }

    /// Subscribe to the worker channels and handle messages until `shutdown`
    /// fires. A failed subscription is returned to the caller.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let joins = self
            .transport
            .subscribe_with_group(&self.channels.worker_join(), COORDINATORS_GROUP, &self.node_id)
            .await?;
        let heartbeats = self
            .transport
            .subscribe_with_group(
                &self.channels.worker_heartbeat(),
                COORDINATORS_GROUP,
                &self.node_id,
            )
            .await?;
        let shutdowns = self
            .transport
            .subscribe_with_group(
                &self.channels.worker_shutdown(),
                COORDINATORS_GROUP,
                &self.node_id,
            )
            .await?;

        let join_handler = self.clone();
        let heartbeat_handler = self.clone();
        let shutdown_handler = self;
        tokio::join!(
            consume(joins, shutdown.clone(), move |message: WorkerJoinMessage| {
                let this = join_handler.clone();
                async move {
                    if let Err(e) = this.handle_join(message).await {
                        tracing::warn!(error = %e, "Failed to register worker");
                    }
                    Flow::Continue
                }
            }),
            consume(heartbeats, shutdown.clone(), move |message: WorkerHeartbeatMessage| {
                let this = heartbeat_handler.clone();
                async move {
                    if let Err(e) = this.handle_heartbeat(message).await {
                        tracing::warn!(error = %e, "Failed to record worker heartbeat");
                    }
                    Flow::Continue
                }
            }),
            consume(shutdowns, shutdown, move |message: WorkerShutdownMessage| {
                let this = shutdown_handler.clone();
                async move {
                    if let Err(e) = this.handle_shutdown(message).await {
                        tracing::warn!(error = %e, "Failed to record worker shutdown");
                    }
                    Flow::Continue
                }
            }),
        );
        Ok(())
    }

    /// Register or refresh a worker and send it the cluster's worker timings.
    pub async fn handle_join(&self, message: WorkerJoinMessage) -> Result<()> {
        let now = Utc::now();
        let worker = Worker {
            worker_id: message.worker_id.clone(),
            queues: message.queues,
            max_concurrency: message.max_concurrency,
            current_load: 0,
            last_heartbeat: now,
            status: WorkerStatus::Active,
            registered_at: now,
            hostname: message.hostname,
        };
        self.workers.upsert(worker).await?;

        let config = WorkerConfigMessage {
            heartbeat_interval_ms: self.defaults.heartbeat_interval_ms,
            default_job_timeout_ms: self.defaults.job_timeout_ms,
            worker_timeout_ms: self.defaults.dead_timeout_ms,
        };
        publish_message(
            self.transport.as_ref(),
            &self.channels.worker_config(&message.worker_id),
            &config,
        )
        .await?;

        tracing::info!(worker_id = %message.worker_id, node_id = %self.node_id, "Worker joined");
        Ok(())
    }

    pub async fn handle_heartbeat(&self, message: WorkerHeartbeatMessage) -> Result<()> {
        let known = self
            .workers
            .record_heartbeat(&message.worker_id, message.current_load, message.status)
            .await?;
        if known {
            return Ok(());
        }

        // Heartbeat before join, e.g. after a coordinator store reset.
        let now = Utc::now();
        self.workers
            .upsert(Worker {
                worker_id: message.worker_id.clone(),
                queues: Vec::new(),
                max_concurrency: 0,
                current_load: message.current_load,
                last_heartbeat: now,
                status: message.status,
                registered_at: now,
                hostname: None,
            })
            .await?;
        tracing::info!(worker_id = %message.worker_id, "Registered worker from heartbeat");
        Ok(())
    }

    pub async fn handle_shutdown(&self, message: WorkerShutdownMessage) -> Result<()> {
        if self.workers.mark_offline(&message.worker_id, None).await? {
            tracing::info!(
                worker_id = %message.worker_id,
                graceful = message.graceful,
                reason = message.reason.as_deref().unwrap_or(""),
                "Worker left"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transport::MemoryBus;

    fn registry(store: &MemoryStore, bus: &MemoryBus) -> WorkerRegistry {
        WorkerRegistry::new(
            "node-a",
            Arc::new(store.clone()),
            Arc::new(bus.connect()),
            Channels::new("t"),
            WorkerDefaults::default(),
        )
    }

    fn join(worker_id: &str) -> WorkerJoinMessage {
        WorkerJoinMessage {
            worker_id: worker_id.into(),
            hostname: Some("box".into()),
            queues: vec!["default".into(), "mail".into()],
            max_concurrency: 8,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_join_registers_and_replies_with_defaults() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let mut replies = bus
            .connect()
            .subscribe(&Channels::new("t").worker_config("w1"))
            .await
            .unwrap();

        registry(&store, &bus).handle_join(join("w1")).await.unwrap();

        let worker = store.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Active);
        assert_eq!(worker.max_concurrency, 8);
        assert_eq!(worker.queues.len(), 2);

        let reply: WorkerConfigMessage =
            serde_json::from_str(&replies.recv().await.unwrap().payload).unwrap();
        assert_eq!(reply.heartbeat_interval_ms, 10_000);
        assert_eq!(reply.default_job_timeout_ms, 300_000);
        assert_eq!(reply.worker_timeout_ms, 30_000);
    }

    #[tokio::test]
    async fn test_heartbeat_and_shutdown_update_the_record() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let registry = registry(&store, &bus);
        registry.handle_join(join("w1")).await.unwrap();

        registry
            .handle_heartbeat(WorkerHeartbeatMessage {
                worker_id: "w1".into(),
                current_load: 3,
                status: WorkerStatus::Draining,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        let worker = store.get("w1").await.unwrap().unwrap();
        assert_eq!(worker.current_load, 3);
        assert_eq!(worker.status, WorkerStatus::Draining);

        registry
            .handle_shutdown(WorkerShutdownMessage {
                worker_id: "w1".into(),
                reason: Some("deploy".into()),
                graceful: true,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.get("w1").await.unwrap().unwrap().status, WorkerStatus::Offline);
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_worker_registers_it() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        registry(&store, &bus)
            .handle_heartbeat(WorkerHeartbeatMessage {
                worker_id: "w9".into(),
                current_load: 1,
                status: WorkerStatus::Active,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        assert!(store.get("w9").await.unwrap().is_some());
    }
}
