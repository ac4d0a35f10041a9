use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::election::CoordinatorRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    Draining,
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Draining => write!(f, "draining"),
            NodeStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Liveness record of a coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorNode {
    pub node_id: String,
    pub role: CoordinatorRole,
    pub job_count: u64,
    pub last_heartbeat: DateTime<Utc>,
    pub status: NodeStatus,
    pub joined_at: DateTime<Utc>,
    pub hostname: Option<String>,
    pub process_id: Option<u32>,
}

impl CoordinatorNode {
    pub fn new(node_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            role: CoordinatorRole::Follower,
            job_count: 0,
            last_heartbeat: now,
            status: NodeStatus::Active,
            joined_at: now,
            hostname: None,
            process_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Active,
    Draining,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Active => write!(f, "active"),
            WorkerStatus::Draining => write!(f, "draining"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub queues: Vec<String>,
    pub max_concurrency: u32,
    pub current_load: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
    pub hostname: Option<String>,
}
