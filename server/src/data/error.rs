//! Storage error type
//!
//! Wraps the per-backend errors seen by the storage dispatcher and the
//! replay queries of the trace processor.

use thiserror::Error;

use super::cache::CacheError;
use super::docstore::DocStoreError;
use super::sink::MetricsSinkError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Document store error: {0}")]
    DocStore(#[from] DocStoreError),

    #[error("Metrics sink error: {0}")]
    MetricsSink(#[from] MetricsSinkError),

    /// The dispatcher channel was closed before the request was accepted
    #[error("Storage channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_error_display() {
        let err: StorageError = CacheError::Connection("refused".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Cache error: Cache connection error: refused"
        );
        assert_eq!(StorageError::ChannelClosed.to_string(), "Storage channel closed");
    }
}
