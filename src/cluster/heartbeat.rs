use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tokio_util::sync::CancellationToken;

use super::model::{CoordinatorNode, NodeStatus};
use super::stats::JobStatsCache;
use crate::election::{CoordinatorRole, LeadershipFlag};
use crate::error::Result;
use crate::store::CoordinatorNodeStore;
use crate::tasks::PeriodicTask;
use crate::transport::messages::NodeMetricsMessage;
use crate::transport::{publish_message, Channels, Transport};

/// CPU and resident memory of this process.
struct ProcessSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessSampler {
    fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// `(cpu_millicores, memory_bytes)`. CPU usage is measured since the
    /// previous sample, so the first one reads zero.
    fn sample(&self) -> (u64, u64) {
        let Some(pid) = self.pid else {
            return (0, 0);
        };
        let Ok(mut system) = self.system.lock() else {
            return (0, 0);
        };
        system.refresh_process(pid);
        system
            .process(pid)
            .map(|process| ((process.cpu_usage() * 10.0) as u64, process.memory()))
            .unwrap_or((0, 0))
    }
}

/// Periodic liveness write and metrics broadcast for this node.
pub struct NodeHeartbeat {
    node_id: String,
    nodes: Arc<dyn CoordinatorNodeStore>,
    transport: Arc<dyn Transport>,
    channels: Channels,
    leadership: LeadershipFlag,
    stats: Arc<JobStatsCache>,
    hostname: Option<String>,
    sampler: ProcessSampler,
    interval: Duration,
}

impl NodeHeartbeat {
    pub fn new(
        node_id: impl Into<String>,
        nodes: Arc<dyn CoordinatorNodeStore>,
        transport: Arc<dyn Transport>,
        channels: Channels,
        leadership: LeadershipFlag,
        stats: Arc<JobStatsCache>,
        interval: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            nodes,
            transport,
            channels,
            leadership,
            stats,
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
            sampler: ProcessSampler::new(),
            interval,
        }
    }

    fn role(&self) -> CoordinatorRole {
        if self.leadership.is_leader() {
            CoordinatorRole::Leader
        } else {
            CoordinatorRole::Follower
        }
    }

    fn record(&self, status: NodeStatus) -> CoordinatorNode {
        let mut node = CoordinatorNode::new(self.node_id.clone(), Utc::now());
        node.role = self.role();
        node.status = status;
        node.job_count = self.stats.owned();
        node.hostname = self.hostname.clone();
        node.process_id = Some(std::process::id());
        node
    }

    /// Write this node's liveness record and publish its metrics.
    pub async fn beat(&self) -> Result<()> {
        let node = self.record(NodeStatus::Active);
        self.nodes.upsert(node.clone()).await?;

        let stats = self.stats.snapshot();
        let (cpu_millicores, memory_bytes) = self.sampler.sample();
        let metrics = NodeMetricsMessage {
            node_id: node.node_id.clone(),
            role: node.role,
            status: node.status,
            timestamp: node.last_heartbeat,
            job_count: stats.owned,
            queued_job_count: stats.queued,
            cpu_millicores,
            memory_bytes,
            hostname: node.hostname.clone(),
            pid: node.process_id,
        };
        if let Err(e) = publish_message(
            self.transport.as_ref(),
            &self.channels.coordinator_metrics(),
            &metrics,
        )
        .await
        {
            tracing::warn!(node_id = %self.node_id, error = %e, "Failed to publish node metrics");
        }

        tracing::trace!(node_id = %self.node_id, role = %node.role, "Heartbeat written");
        Ok(())
    }

    /// Record a clean exit: Follower and Offline, so nobody waits for the
    /// heartbeat to time out.
    pub async fn sign_off(&self) -> Result<()> {
        let mut node = self.record(NodeStatus::Offline);
        node.role = CoordinatorRole::Follower;
        self.nodes.upsert(node).await?;
        tracing::info!(node_id = %self.node_id, "Node signed off");
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for NodeHeartbeat {
    fn name(&self) -> &'static str {
        "node-heartbeat"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, _shutdown: &CancellationToken) -> Result<()> {
        self.beat().await
    }

    async fn on_shutdown(&self) {
        if let Err(e) = self.sign_off().await {
            tracing::warn!(node_id = %self.node_id, error = %e, "Failed to write offline status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transport::MemoryBus;

    #[tokio::test]
    async fn test_beat_writes_record_and_publishes_metrics() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let channels = Channels::new("t");
        let mut metrics = bus
            .connect()
            .subscribe(&channels.coordinator_metrics())
            .await
            .unwrap();
        let stats = Arc::new(JobStatsCache::new());
        stats.set_owned(1);

        let heartbeat = NodeHeartbeat::new(
            "node-a",
            Arc::new(store.clone()),
            Arc::new(bus.connect()),
            channels,
            LeadershipFlag::constant(true),
            stats,
            Duration::from_secs(10),
        );
        heartbeat.beat().await.unwrap();

        let node = store.get("node-a").await.unwrap().unwrap();
        assert_eq!(node.role, CoordinatorRole::Leader);
        assert_eq!(node.status, NodeStatus::Active);
        assert_eq!(node.job_count, 1);
        assert_eq!(node.process_id, Some(std::process::id()));

        let message: NodeMetricsMessage =
            serde_json::from_str(&metrics.recv().await.unwrap().payload).unwrap();
        assert_eq!(message.node_id, "node-a");
        assert_eq!(message.job_count, 1);
    }

    #[tokio::test]
    async fn test_sign_off_demotes_and_marks_offline() {
        let store = MemoryStore::new();
        let heartbeat = NodeHeartbeat::new(
            "node-a",
            Arc::new(store.clone()),
            Arc::new(MemoryBus::new().connect()),
            Channels::new("t"),
            LeadershipFlag::constant(true),
            Arc::new(JobStatsCache::new()),
            Duration::from_secs(10),
        );
        heartbeat.beat().await.unwrap();
        let joined_at = store.get("node-a").await.unwrap().unwrap().joined_at;

        heartbeat.on_shutdown().await;

        let node = store.get("node-a").await.unwrap().unwrap();
        assert_eq!(node.role, CoordinatorRole::Follower);
        assert_eq!(node.status, NodeStatus::Offline);
        assert_eq!(node.joined_at, joined_at);
    }
}
