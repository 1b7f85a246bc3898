//! Redis-compatible cache implementation using deadpool-redis
//!
//! Used for the short-TTL `traceInfo` span cache and the replay query
//! limiter when several precalc instances share one keyspace.
//!
//! ```text
//! redis://[user:password@]host:port[/db]
//! rediss://[user:password@]host:port[/db]  (TLS)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};

use super::backend::CacheBackend;
use super::error::CacheError;

/// Atomic INCR + PEXPIRE, the TTL is only set on the first increment
const INCR_WITH_TTL_SCRIPT: &str = r#"
    local count = redis.call('INCR', KEYS[1])
    if count == 1 and ARGV[1] then
        redis.call('PEXPIRE', KEYS[1], ARGV[1])
    end
    return count
"#;

pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    /// Create the pool and verify the connection with a PING
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let sanitized_url = sanitize_redis_url(redis_url);

        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: 32,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });
        let pool = config.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            CacheError::Connection(format!(
                "Failed to create Redis pool for {sanitized_url}: {e}"
            ))
        })?;

        let mut conn = pool.get().await.map_err(|e| {
            CacheError::Connection(format!(
                "Failed to get Redis connection for {sanitized_url}: {e}"
            ))
        })?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| {
                CacheError::Connection(format!("Redis PING failed for {sanitized_url}: {e}"))
            })?;

        tracing::debug!(url = %sanitized_url, "Redis cache connected");

        Ok(Self { pool })
    }
}

/// Mask the password of a Redis URL for logging
fn sanitize_redis_url(url: &str) -> String {
    // rfind so passwords containing '@' are masked whole
    if let Some(at_pos) = url.rfind('@') {
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        if scheme_end <= at_pos
            && let Some(colon_pos) = url[scheme_end..at_pos].find(':')
        {
            let abs_colon = scheme_end + colon_pos;
            return format!("{}***{}", &url[..=abs_colon], &url[at_pos..]);
        }
    }
    url.to_string()
}

/// Millisecond TTL, never zero (0 would mean no expiry)
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.pool.get().await?;
        let result: Option<Vec<u8>> = conn.get(key).await?;
        Ok(result)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        match ttl {
            Some(ttl) => {
                let _: () = deadpool_redis::redis::cmd("PSETEX")
                    .arg(key)
                    .arg(ttl_millis(ttl))
                    .arg(value)
                    .query_async(&mut conn)
                    .await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        let mut conn = self.pool.get().await?;
        let ttl_ms = ttl.map(ttl_millis).unwrap_or(60_000);

        let count: i64 = deadpool_redis::redis::cmd("EVAL")
            .arg(INCR_WITH_TTL_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn close(&self) {
        self.pool.close();
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
