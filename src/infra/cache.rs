//! Redis cache backend over a deadpool connection pool.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Config as RedisConfig, Pool, PoolConfig, PoolError, Runtime, Timeouts};
use redis::{AsyncCommands, RedisError};
use tracing::{debug, info};

use crate::cache::{BackendError, CacheBackend};

use super::error::InfraError;

const SOURCE: &str = "infra::cache";
const SCAN_BATCH: usize = 500;

pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Build the pool. Connections are opened lazily, so an unreachable server
    /// surfaces on first use rather than here.
    pub fn connect(url: &str, pool_size: usize, timeout: Duration) -> Result<Self, InfraError> {
        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(timeout);
        timeouts.create = Some(timeout);
        timeouts.recycle = Some(timeout);
        let mut pool_config = PoolConfig::new(pool_size.max(1));
        pool_config.timeouts = timeouts;

        let mut config = RedisConfig::from_url(url);
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| InfraError::cache(format!("failed to create redis pool: {err}")))?;
        info!(target: SOURCE, pool_size, "redis pool created");
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, BackendError> {
        self.pool.get().await.map_err(pool_error)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map(|value| value.map(Bytes::from))
            .map_err(redis_error)
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value.as_ref(), ttl_secs)
            .await
            .map_err(redis_error)
    }

    async fn delete(&self, key: &str) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        conn.del::<_, u64>(key).await.map_err(redis_error)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;

            if !keys.is_empty() {
                removed += conn.del::<_, u64>(&keys).await.map_err(redis_error)?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(target: SOURCE, prefix, removed, "deleted keys by prefix");
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(BackendError::Protocol(format!("unexpected PING reply `{reply}`")))
        }
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Escape Redis glob metacharacters so a prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn redis_error(err: RedisError) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Protocol(err.to_string())
    }
}

fn pool_error(err: PoolError) -> BackendError {
    match err {
        PoolError::Timeout(_) => BackendError::Timeout,
        other => BackendError::Connection(other.to_string()),
    }
}
