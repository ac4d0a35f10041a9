use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::job::Job;
use crate::cache::CacheInvalidator;
use crate::cluster::stats::JobStatsCache;
use crate::error::Result;
use crate::store::JobStore;
use crate::transport::messages::{JobDispatchMessage, JobDispatchedEvent};
use crate::transport::{publish_message, Channels, Transport};

/// Hands pending jobs to workers and announces each dispatch to followers.
pub struct JobDispatcher {
    jobs: Arc<dyn JobStore>,
    transport: Arc<dyn Transport>,
    channels: Channels,
    cache: Arc<dyn CacheInvalidator>,
    stats: Arc<JobStatsCache>,
}

impl JobDispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        transport: Arc<dyn Transport>,
        channels: Channels,
        cache: Arc<dyn CacheInvalidator>,
        stats: Arc<JobStatsCache>,
    ) -> Self {
        Self {
            jobs,
            transport,
            channels,
            cache,
            stats,
        }
    }

    /// Dispatch one job under a fresh execution id.
    ///
    /// The dispatch message goes out before the job is marked, so a worker may
    /// see it while the row still reads Pending. If marking loses to another
    /// writer the job was already moved on; no assignment event is published
    /// and `None` is returned. If the assignment event cannot be published the
    /// job is put back to Pending for the next scan and the error is returned.
    pub async fn dispatch(&self, job: &Job) -> Result<Option<Uuid>> {
        let execution_id = Uuid::new_v4();
        let message = JobDispatchMessage {
            job_id: job.id,
            execution_id,
            job_type: job.job_type.clone(),
            arguments_json: job.arguments.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            correlation_id: job.correlation_id.clone(),
        };
        publish_message(
            self.transport.as_ref(),
            &self.channels.job_dispatch(&job.queue),
            &message,
        )
        .await?;

        let now = Utc::now();
        if !self.jobs.mark_dispatched(job.id, execution_id, now).await? {
            tracing::debug!(job_id = %job.id, "Job changed before it could be marked dispatched");
            return Ok(None);
        }

        let event = JobDispatchedEvent {
            job_id: job.id,
            execution_id,
            queue: job.queue.clone(),
            timestamp: now,
        };
        if let Err(e) = publish_message(
            self.transport.as_ref(),
            &self.channels.job_dispatched(),
            &event,
        )
        .await
        {
            match self.jobs.revert_dispatch(job.id, execution_id).await {
                Ok(true) => tracing::warn!(job_id = %job.id, error = %e, "Assignment not announced, job returned to pending"),
                Ok(false) => {}
                Err(revert) => {
                    tracing::error!(job_id = %job.id, error = %revert, "Failed to return unannounced job to pending")
                }
            }
            self.cache.invalidate_job(job.id).await;
            return Err(e);
        }

        self.cache.invalidate_job(job.id).await;
        self.cache.invalidate_queue(&job.queue).await;
        self.stats.job_dispatched();

        tracing::info!(
            job_id = %job.id,
            execution_id = %execution_id,
            queue = %job.queue,
            retry_count = job.retry_count,
            "Dispatched job"
        );
        Ok(Some(execution_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKeys, MemoryCache, DEFAULT_JOB_TTL};
    use crate::scheduler::job::JobStatus;
    use crate::error::CoordinatorError;
    use crate::store::MemoryStore;
    use crate::transport::{MemoryBus, MemoryTransport, Subscription};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Delivers everything except publishes on one refused channel.
    struct RefusingTransport {
        inner: MemoryTransport,
        refused: String,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn publish(&self, channel: &str, payload: String) -> Result<()> {
            if channel == self.refused {
                return Err(CoordinatorError::Transport("broker unavailable".into()));
            }
            self.inner.publish(channel, payload).await
        }

        async fn subscribe(&self, channel: &str) -> Result<Subscription> {
            self.inner.subscribe(channel).await
        }

        async fn subscribe_with_group(
            &self,
            channel: &str,
            group: &str,
            consumer: &str,
        ) -> Result<Subscription> {
            self.inner.subscribe_with_group(channel, group, consumer).await
        }

        async fn unsubscribe(&self, channel: &str) -> Result<()> {
            self.inner.unsubscribe(channel).await
        }
    }

    struct Fixture {
        store: MemoryStore,
        cache: Arc<MemoryCache>,
        dispatcher: JobDispatcher,
        work: Subscription,
        assigned: Subscription,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let transport = bus.connect();
        let observer = bus.connect();
        let channels = Channels::new("t");
        let work = observer
            .subscribe(&channels.job_dispatch("default"))
            .await
            .unwrap();
        let assigned = observer
            .subscribe(&channels.job_dispatched())
            .await
            .unwrap();
        let cache = Arc::new(MemoryCache::new(CacheKeys::new("t")));
        let dispatcher = JobDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(transport),
            channels,
            cache.clone(),
            Arc::new(JobStatsCache::new()),
        );
        Fixture {
            store,
            cache,
            dispatcher,
            work,
            assigned,
        }
    }

    async fn next_payload(subscription: &mut Subscription) -> String {
        tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("no message published")
            .expect("subscription closed")
            .payload
    }

    #[tokio::test]
    async fn test_dispatch_publishes_marks_and_announces() {
        let mut f = fixture().await;
        let job = f.store.enqueue(Job::new("email", "default", "{\"to\":1}")).await.unwrap();
        f.cache
            .set(&f.cache.keys().job(job.id), &"stale", DEFAULT_JOB_TTL)
            .unwrap();

        let execution_id = f.dispatcher.dispatch(&job).await.unwrap().unwrap();

        let message: JobDispatchMessage =
            serde_json::from_str(&next_payload(&mut f.work).await).unwrap();
        assert_eq!(message.job_id, job.id);
        assert_eq!(message.execution_id, execution_id);
        assert_eq!(message.arguments_json, "{\"to\":1}");

        let event: JobDispatchedEvent =
            serde_json::from_str(&next_payload(&mut f.assigned).await).unwrap();
        assert_eq!(event.execution_id, execution_id);
        assert_eq!(event.queue, "default");

        let stored = f.store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Dispatched);
        assert_eq!(stored.execution_id, Some(execution_id));
        assert!(stored.worker_id.is_none());
        assert!(!f.cache.contains(&f.cache.keys().job(job.id)));
    }

    #[tokio::test]
    async fn test_redispatch_of_non_pending_job_is_not_announced() {
        let mut f = fixture().await;
        let job = f.store.enqueue(Job::new("email", "default", "{}")).await.unwrap();
        f.dispatcher.dispatch(&job).await.unwrap().unwrap();
        next_payload(&mut f.assigned).await;

        assert!(f.dispatcher.dispatch(&job).await.unwrap().is_none());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), f.assigned.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_failed_announcement_returns_job_to_pending() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let channels = Channels::new("t");
        let mut work = bus
            .connect()
            .subscribe(&channels.job_dispatch("default"))
            .await
            .unwrap();
        let stats = Arc::new(JobStatsCache::new());
        let dispatcher = JobDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(RefusingTransport {
                inner: bus.connect(),
                refused: channels.job_dispatched(),
            }),
            channels,
            Arc::new(MemoryCache::new(CacheKeys::new("t"))),
            stats.clone(),
        );
        let job = store.enqueue(Job::new("email", "default", "{}")).await.unwrap();

        assert!(dispatcher.dispatch(&job).await.is_err());

        // The worker saw the attempt, but the job is free for the next scan.
        next_payload(&mut work).await;
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.execution_id.is_none());
        assert!(stored.follower_node_id.is_none());
        assert_eq!(stats.snapshot().dispatched, 0);
        assert_eq!(store.get_pending(10).await.unwrap().len(), 1);
    }
}
