//! Fixed window rate limiter on top of the cache backend
//!
//! A window starts at the first request for an identifier and resets once
//! its TTL elapses. The counter lives in the cache, so with the Redis backend
//! the limit is shared by every precalc instance. Windows can admit up to
//! twice the limit across a boundary, which is acceptable for replay queries.

use std::sync::Arc;
use std::time::Duration;

use super::CacheService;
use super::key::CacheKey;
use crate::core::constants::DEFAULT_RATE_LIMIT_WINDOW_SECS;

#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    /// Bucket name, part of the counter key
    pub name: &'static str,
    pub requests_per_window: u32,
    pub window_secs: u64,
}

impl RateLimitBucket {
    /// Document store replay queries, `rpm` per data id
    pub fn doc_query(rpm: u32) -> Self {
        Self {
            name: "doc_query",
            requests_per_window: rpm,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
}

pub struct RateLimiter {
    cache: Arc<CacheService>,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    /// Count one request for `identifier` and report whether it fits the window
    ///
    /// A cache failure allows the request so replay never stalls on the limiter.
    pub async fn check(&self, bucket: &RateLimitBucket, identifier: &str) -> RateLimitResult {
        let key = CacheKey::rate_limit(bucket.name, identifier);
        let window = Duration::from_secs(bucket.window_secs);

        let count = match self.cache.incr(&key, Some(window)).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(
                    bucket = bucket.name,
                    %identifier,
                    error = %e,
                    "Rate limit cache increment failed, allowing request"
                );
                1
            }
        };

        let limit = bucket.requests_per_window;
        let allowed = count <= i64::from(limit);

        tracing::trace!(
            bucket = bucket.name,
            %identifier,
            count,
            limit,
            allowed,
            "Rate limit check"
        );

        RateLimitResult { allowed, limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheBackendType, CacheConfig};

    async fn test_cache() -> Arc<CacheService> {
        let config = CacheConfig {
            backend: CacheBackendType::Memory,
            max_entries: 1000,
            redis_url: None,
        };
        Arc::new(CacheService::new(&config).await.unwrap())
    }

    fn bucket(requests: u32, window_secs: u64) -> RateLimitBucket {
        RateLimitBucket {
            name: "test",
            requests_per_window: requests,
            window_secs,
        }
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_over_limit() {
        let limiter = RateLimiter::new(test_cache().await);
        let bucket = bucket(5, 60);

        for i in 0..5 {
            let result = limiter.check(&bucket, "1001").await;
            assert!(result.allowed, "Request {} should be allowed", i);
        }

        let result = limiter.check(&bucket, "1001").await;
        assert!(!result.allowed);
        assert_eq!(result.limit, 5);
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let limiter = RateLimiter::new(test_cache().await);
        let bucket = bucket(1, 0);

        assert!(limiter.check(&bucket, "1001").await.allowed);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(limiter.check(&bucket, "1001").await.allowed);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let limiter = RateLimiter::new(test_cache().await);
        let bucket = bucket(1, 60);

        assert!(limiter.check(&bucket, "1001").await.allowed);
        assert!(!limiter.check(&bucket, "1001").await.allowed);
        assert!(limiter.check(&bucket, "1002").await.allowed);
    }

    #[test]
    fn test_doc_query_bucket() {
        let bucket = RateLimitBucket::doc_query(20);
        assert_eq!(bucket.name, "doc_query");
        assert_eq!(bucket.requests_per_window, 20);
        assert_eq!(bucket.window_secs, DEFAULT_RATE_LIMIT_WINDOW_SECS);
    }
}
