//! Cache key builder

use crate::core::constants::CACHE_KEY_VERSION;

/// Cache key builder
///
/// Internal keys carry a version prefix (e.g. "v1:") so a schema change can
/// invalidate them. `trace_info` keys are shared with other writers of the
/// same cache and therefore have a fixed, unversioned layout.
pub struct CacheKey;

impl CacheKey {
    /// Span list of a finalized trace: `traceInfo:{biz}:{app}:{trace_id}`
    pub fn trace_info(biz_id: &str, app_name: &str, trace_id: &str) -> String {
        format!("traceInfo:{}:{}:{}", biz_id, app_name, trace_id)
    }

    /// Rate limit counter for a bucket and identifier
    pub fn rate_limit(bucket: &str, identifier: &str) -> String {
        format!("{}:ratelimit:{}:{}", CACHE_KEY_VERSION, bucket, identifier)
    }
}
