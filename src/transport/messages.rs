use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::model::{NodeStatus, WorkerStatus};
use crate::election::CoordinatorRole;
use crate::scheduler::job::{JobStatus, LogLevel};

/// Sent to the queue channel; one worker picks it up and runs the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDispatchMessage {
    pub job_id: Uuid,
    pub execution_id: Uuid,
    pub job_type: String,
    pub arguments_json: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub correlation_id: Option<String>,
}

/// Broadcast to the followers group after a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDispatchedEvent {
    pub job_id: Uuid,
    pub execution_id: Uuid,
    pub queue: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusMessage {
    pub job_id: Uuid,
    pub execution_id: Uuid,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLogMessage {
    pub job_id: Uuid,
    pub execution_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetricsMessage {
    pub node_id: String,
    pub role: CoordinatorRole,
    pub status: NodeStatus,
    pub timestamp: DateTime<Utc>,
    pub job_count: u64,
    pub queued_job_count: u64,
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
    pub hostname: Option<String>,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJoinMessage {
    pub worker_id: String,
    #[serde(default)]
    pub hostname: Option<String>,
    pub queues: Vec<String>,
    pub max_concurrency: u32,
    pub timestamp: DateTime<Utc>,
}

/// Reply to a join, carrying the cluster's worker timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfigMessage {
    pub heartbeat_interval_ms: u64,
    pub default_job_timeout_ms: u64,
    pub worker_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHeartbeatMessage {
    pub worker_id: String,
    pub current_load: u32,
    pub status: WorkerStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerShutdownMessage {
    pub worker_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub graceful: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_message_uses_camel_case_and_optional_fields() {
        let job_id = Uuid::new_v4();
        let execution_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"jobId":"{}","executionId":"{}","status":"Completed"}}"#,
            job_id, execution_id
        );
        let message: JobStatusMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(message.job_id, job_id);
        assert_eq!(message.status, JobStatus::Completed);
        assert!(message.error.is_none());
        assert!(message.worker_id.is_none());
    }

    #[test]
    fn dispatch_message_field_names() {
        let message = JobDispatchMessage {
            job_id: Uuid::nil(),
            execution_id: Uuid::nil(),
            job_type: "email".into(),
            arguments_json: "{}".into(),
            retry_count: 1,
            max_retries: 3,
            correlation_id: None,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("argumentsJson").is_some());
        assert!(value.get("maxRetries").is_some());
        assert!(value.get("correlationId").is_some());
    }
}
