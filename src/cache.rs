//! Short-lived cached views of store records.
//!
//! The cache is per node and never authoritative. Writers invalidate the keys
//! they touch; readers fall back to the store on a miss.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;

pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn job(&self, job_id: Uuid) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    pub fn jobs_by_queue(&self, queue: &str) -> String {
        format!("{}:jobs:queue:{}", self.prefix, queue)
    }
}

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate_job(&self, job_id: Uuid);

    async fn invalidate_queue(&self, queue: &str);
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// JSON values keyed by string with a per-entry TTL.
pub struct MemoryCache {
    keys: CacheKeys,
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new(keys: CacheKeys) -> Self {
        Self {
            keys,
            entries: DashMap::new(),
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let value = {
            let entry = self.entries.get(key)?;
            if entry.expires_at <= now {
                None
            } else {
                Some(entry.value.clone())
            }
        };
        match value {
            Some(value) => serde_json::from_str(&value).ok(),
            None => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let value = serde_json::to_string(value)?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .map_or(false, |entry| entry.expires_at > now)
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[async_trait]
impl CacheInvalidator for MemoryCache {
    async fn invalidate_job(&self, job_id: Uuid) {
        self.remove(&self.keys.job(job_id));
    }

    async fn invalidate_queue(&self, queue: &str) {
        self.remove(&self.keys.jobs_by_queue(queue));
    }
}
