use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::time::Instant;
use uuid::Uuid;

use super::{DistributedLock, LockProvider, ACQUIRE_RETRY_DELAY};
use crate::error::Result;

/// Renew only if the key still holds our token.
const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Delete only if the key still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Leases stored as Redis keys with a millisecond expiry.
#[derive(Clone)]
pub struct RedisLockProvider {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisLockProvider {
    pub async fn connect(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    pub fn lock_key(prefix: &str, resource: &str) -> String {
        format!("{}:lock:{}", prefix, resource)
    }
}

impl LockProvider for RedisLockProvider {
    fn create_lock(&self, resource: &str) -> Box<dyn DistributedLock> {
        Box::new(RedisLock {
            conn: self.conn.clone(),
            resource: resource.to_string(),
            key: Self::lock_key(&self.key_prefix, resource),
            token: Uuid::new_v4().to_string(),
            held: false,
        })
    }
}

pub struct RedisLock {
    conn: ConnectionManager,
    resource: String,
    key: String,
    token: String,
    held: bool,
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl DistributedLock for RedisLock {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn is_held(&self) -> bool {
        self.held
    }

    async fn try_acquire(&mut self, ttl: Duration, timeout: Duration) -> Result<bool> {
        if !self.held {
            self.token = Uuid::new_v4().to_string();
        }

        let deadline = Instant::now() + timeout;
        loop {
            let reply: Option<String> = redis::cmd("SET")
                .arg(&self.key)
                .arg(&self.token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut self.conn)
                .await?;

            if reply.is_some() {
                self.held = true;
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ACQUIRE_RETRY_DELAY.min(deadline - now)).await;
        }
    }

    async fn extend(&mut self, ttl: Duration) -> Result<bool> {
        let extended: i64 = Script::new(EXTEND_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut self.conn)
            .await?;
        self.held = extended == 1;
        Ok(self.held)
    }

    async fn release(&mut self) -> Result<()> {
        self.held = false;
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut self.conn)
            .await?;
        Ok(())
    }
}

impl Drop for RedisLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let mut conn = self.conn.clone();
        let key = self.key.clone();
        let token = self.token.clone();
        handle.spawn(async move {
            let released: redis::RedisResult<i64> = Script::new(RELEASE_SCRIPT)
                .key(&key)
                .arg(&token)
                .invoke_async(&mut conn)
                .await;
            if let Err(e) = released {
                tracing::warn!(key = %key, error = %e, "Failed to release abandoned lock");
            }
        });
    }
}
