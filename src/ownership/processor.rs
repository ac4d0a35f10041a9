use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::cleanup::OwnershipCleanup;
use crate::cache::CacheInvalidator;
use crate::scheduler::job::LogEntry;
use crate::store::{JobStore, LogStore, StatusOutcome, StatusReport};
use crate::transport::messages::{JobLogMessage, JobStatusMessage};
use crate::transport::Flow;

/// Applies worker status and log messages for the executions this node owns.
pub struct JobEventProcessor {
    jobs: Arc<dyn JobStore>,
    logs: Arc<dyn LogStore>,
    cache: Arc<dyn CacheInvalidator>,
    cleanup: Arc<OwnershipCleanup>,
}

impl JobEventProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        logs: Arc<dyn LogStore>,
        cache: Arc<dyn CacheInvalidator>,
        cleanup: Arc<OwnershipCleanup>,
    ) -> Self {
        Self {
            jobs,
            logs,
            cache,
            cleanup,
        }
    }

    /// Apply one status report. Returns [`Flow::Stop`] once the execution has
    /// reached a terminal state and its channels are torn down.
    pub async fn handle_status(&self, message: JobStatusMessage) -> Flow {
        let report = StatusReport {
            job_id: message.job_id,
            execution_id: message.execution_id,
            status: message.status,
            error: message.error,
            worker_id: message.worker_id,
            completed_at: message.completed_at,
        };

        match self.jobs.update_status(&report).await {
            Ok(StatusOutcome::Applied(job)) => {
                self.cache.invalidate_job(job.id).await;
                tracing::debug!(
                    job_id = %job.id,
                    execution_id = %report.execution_id,
                    status = %job.status,
                    "Applied job status"
                );
                if job.status.is_terminal() {
                    tracing::info!(job_id = %job.id, status = %job.status, "Job finished");
                    self.finish(job.id, report.execution_id).await;
                    return Flow::Stop;
                }
                Flow::Continue
            }
            Ok(StatusOutcome::Stale) => {
                tracing::debug!(
                    job_id = %report.job_id,
                    execution_id = %report.execution_id,
                    "Ignoring status for a superseded execution"
                );
                Flow::Continue
            }
            Ok(StatusOutcome::Rejected { current }) => {
                tracing::debug!(
                    job_id = %report.job_id,
                    current = %current,
                    reported = %report.status,
                    "Ignoring backward status transition"
                );
                if current.is_terminal() {
                    // Redelivered terminal report; make sure cleanup happened.
                    self.finish(report.job_id, report.execution_id).await;
                    return Flow::Stop;
                }
                Flow::Continue
            }
            Ok(StatusOutcome::NotFound) => {
                tracing::warn!(job_id = %report.job_id, "Status for unknown job, dropping execution");
                self.finish(report.job_id, report.execution_id).await;
                Flow::Stop
            }
            Err(e) => {
                tracing::warn!(job_id = %report.job_id, error = %e, "Failed to apply job status");
                Flow::Continue
            }
        }
    }

    /// Append one log line. Logs are never cached, so nothing is invalidated.
    pub async fn handle_log(&self, message: JobLogMessage) -> Flow {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            job_id: message.job_id,
            execution_id: message.execution_id,
            level: message.level,
            message: message.message,
            timestamp: message.timestamp.unwrap_or_else(Utc::now),
        };
        if let Err(e) = self.logs.append(entry).await {
            tracing::warn!(job_id = %message.job_id, error = %e, "Failed to store job log");
        }
        Flow::Continue
    }

    async fn finish(&self, job_id: Uuid, execution_id: Uuid) {
        if let Err(e) = self.cleanup.cleanup(job_id, execution_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Ownership cleanup failed, leaving it to the sweep");
        }
    }
}
