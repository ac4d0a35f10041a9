//! Cluster membership and liveness.
//!
//! Every node writes a heartbeat record and publishes metrics. The leader
//! scans those records, marks silent coordinators and workers Offline, and
//! returns jobs owned by a departed coordinator to the claim race.

pub mod health;
pub mod heartbeat;
pub mod model;
pub mod stats;
pub mod workers;

pub use health::ClusterHealthMonitor;
pub use heartbeat::NodeHeartbeat;
pub use model::{CoordinatorNode, NodeStatus, Worker, WorkerStatus};
pub use stats::{JobStats, JobStatsCache};
pub use workers::WorkerRegistry;
