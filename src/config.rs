use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{CoordinatorError, Result};

/// Defaults handed to workers when they join the cluster.
///
/// Workers receive these on their `worker:<id>:config` channel in reply to a
/// join broadcast, so every worker runs with the same cluster-wide timings.
#[derive(Debug, Clone)]
pub struct WorkerDefaults {
    /// How often a worker should send heartbeats
    pub heartbeat_interval_ms: u64,
    /// Execution timeout applied to jobs that do not carry their own
    pub job_timeout_ms: u64,
    /// A worker silent for longer than this is considered dead
    pub dead_timeout_ms: u64,
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            job_timeout_ms: 5 * 60_000,
            dead_timeout_ms: 30_000,
        }
    }
}

impl WorkerDefaults {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }
}

/// Exponential backoff applied when a failed job is reset for another attempt.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10_000,
            multiplier: 2.0,
            max_delay_ms: 10 * 60_000,
        }
    }
}

impl RetryBackoff {
    /// Delay before attempt number `retry_count` (1-based) is eligible to run.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub node_id: String,
    pub heartbeat_interval_ms: u64,
    pub leader_lease_duration_ms: u64,
    pub leader_renew_interval_ms: u64,
    /// A coordinator silent for longer than this is marked Offline
    pub node_timeout_ms: u64,
    pub dead_node_check_interval_ms: u64,
    pub schedule_scan_interval_ms: u64,
    pub job_queue_scan_interval_ms: u64,
    pub job_queue_batch_size: usize,
    pub retry_scan_interval_ms: u64,
    /// How long a dispatched job may stay unowned before its assignment is
    /// announced again
    pub unclaimed_grace_ms: u64,
    pub retry_backoff: RetryBackoff,
    pub cache_prefix: String,
    pub channel_prefix: String,
    pub worker_defaults: WorkerDefaults,
    pub dashboard_addr: Option<SocketAddr>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            heartbeat_interval_ms: 10_000,
            leader_lease_duration_ms: 30_000,
            leader_renew_interval_ms: 10_000,
            node_timeout_ms: 30_000,
            dead_node_check_interval_ms: 20_000,
            schedule_scan_interval_ms: 10_000,
            job_queue_scan_interval_ms: 5_000,
            job_queue_batch_size: 100,
            retry_scan_interval_ms: 15_000,
            unclaimed_grace_ms: 20_000,
            retry_backoff: RetryBackoff::default(),
            cache_prefix: "baton".to_string(),
            channel_prefix: "baton".to_string(),
            worker_defaults: WorkerDefaults::default(),
            dashboard_addr: None,
        }
    }
}

/// Hostname of this machine, or a random id when it cannot be read.
pub fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("coordinator-{}", &id[..8])
        })
}

impl CoordinatorConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Derive every liveness timing from one heartbeat interval: leases last
    /// three heartbeats, renewals happen once per heartbeat, and the health
    /// monitor checks every two heartbeats.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        self.heartbeat_interval_ms = ms;
        self.leader_lease_duration_ms = ms * 3;
        self.leader_renew_interval_ms = ms;
        self.node_timeout_ms = ms * 3;
        self.dead_node_check_interval_ms = ms * 2;
        self.unclaimed_grace_ms = ms * 2;
        self
    }

    pub fn with_scan_intervals(mut self, schedule: Duration, job_queue: Duration) -> Self {
        self.schedule_scan_interval_ms = schedule.as_millis() as u64;
        self.job_queue_scan_interval_ms = job_queue.as_millis() as u64;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.job_queue_batch_size = batch_size;
        self
    }

    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    pub fn with_dashboard(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn leader_lease_duration(&self) -> Duration {
        Duration::from_millis(self.leader_lease_duration_ms)
    }

    pub fn leader_renew_interval(&self) -> Duration {
        Duration::from_millis(self.leader_renew_interval_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn dead_node_check_interval(&self) -> Duration {
        Duration::from_millis(self.dead_node_check_interval_ms)
    }

    pub fn schedule_scan_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_scan_interval_ms)
    }

    pub fn job_queue_scan_interval(&self) -> Duration {
        Duration::from_millis(self.job_queue_scan_interval_ms)
    }

    pub fn retry_scan_interval(&self) -> Duration {
        Duration::from_millis(self.retry_scan_interval_ms)
    }

    pub fn unclaimed_grace(&self) -> Duration {
        Duration::from_millis(self.unclaimed_grace_ms)
    }

    /// Check the timing relationships the election and health monitor rely on.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(CoordinatorError::Config("node id must not be empty".into()));
        }

        let intervals = [
            ("heartbeat interval", self.heartbeat_interval_ms),
            ("leader lease duration", self.leader_lease_duration_ms),
            ("leader renew interval", self.leader_renew_interval_ms),
            ("node timeout", self.node_timeout_ms),
            ("dead node check interval", self.dead_node_check_interval_ms),
            ("schedule scan interval", self.schedule_scan_interval_ms),
            ("job queue scan interval", self.job_queue_scan_interval_ms),
            ("retry scan interval", self.retry_scan_interval_ms),
            ("unclaimed grace", self.unclaimed_grace_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(CoordinatorError::Config(format!("{} must be non-zero", name)));
            }
        }

        if self.leader_renew_interval_ms >= self.leader_lease_duration_ms {
            return Err(CoordinatorError::Config(format!(
                "leader renew interval ({}ms) must be shorter than the lease ({}ms)",
                self.leader_renew_interval_ms, self.leader_lease_duration_ms
            )));
        }

        if self.job_queue_batch_size == 0 {
            return Err(CoordinatorError::Config(
                "job queue batch size must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::new("node-a");
        assert_eq!(cfg.node_id, "node-a");
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(cfg.leader_lease_duration(), Duration::from_secs(30));
        assert_eq!(cfg.leader_renew_interval(), Duration::from_secs(10));
        assert_eq!(cfg.node_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.job_queue_batch_size, 100);
        assert_eq!(cfg.cache_prefix, "baton");
        assert!(cfg.dashboard_addr.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn worker_defaults_default() {
        let defaults = WorkerDefaults::default();
        assert_eq!(defaults.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(defaults.job_timeout(), Duration::from_secs(300));
        assert_eq!(defaults.dead_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn heartbeat_interval_derives_liveness_timings() {
        let cfg = CoordinatorConfig::new("n").with_heartbeat_interval(Duration::from_millis(100));
        assert_eq!(cfg.leader_lease_duration(), Duration::from_millis(300));
        assert_eq!(cfg.leader_renew_interval(), Duration::from_millis(100));
        assert_eq!(cfg.node_timeout(), Duration::from_millis(300));
        assert_eq!(cfg.dead_node_check_interval(), Duration::from_millis(200));
        assert_eq!(cfg.unclaimed_grace(), Duration::from_millis(200));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_renew_not_shorter_than_lease() {
        let mut cfg = CoordinatorConfig::new("n");
        cfg.leader_renew_interval_ms = cfg.leader_lease_duration_ms;
        assert!(matches!(cfg.validate(), Err(CoordinatorError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_batch_and_intervals() {
        let cfg = CoordinatorConfig::new("n").with_batch_size(0);
        assert!(cfg.validate().is_err());

        let mut cfg = CoordinatorConfig::new("n");
        cfg.schedule_scan_interval_ms = 0;
        assert!(cfg.validate().is_err());

        let cfg = CoordinatorConfig::new("  ");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retry_backoff_grows_and_caps() {
        let backoff = RetryBackoff::default();
        assert_eq!(backoff.delay_for(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(20));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(40));
        assert_eq!(backoff.delay_for(30), Duration::from_secs(600));
    }

    #[test]
    fn default_node_id_is_not_empty() {
        assert!(!default_node_id().is_empty());
    }
}
