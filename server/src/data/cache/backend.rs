//! Cache backend trait definition

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

/// Cache backend trait
///
/// Both in-memory and Redis backends implement this trait. Operations on
/// individual keys are atomic.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Set a value with optional TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Atomic increment with TTL (creates key if not exists)
    ///
    /// The TTL is only applied when the counter is created, which gives
    /// fixed-window semantics for rate limiting.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError>;

    /// Release connections and drop cached state
    async fn close(&self);

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
