//! Pipeline error type

use thiserror::Error;

use crate::core::metadata::MetadataError;
use crate::data::StorageError;

/// Errors reported on a pipeline's error channel
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Task panicked for data id {data_id}: {message}")]
    Panic { data_id: String, message: String },

    #[error("Metadata lookup failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error for data id {data_id}: {message}")]
    Config { data_id: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_display() {
        let err = PipelineError::Panic {
            data_id: "1001".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Task panicked for data id 1001: boom");
    }

    #[test]
    fn test_metadata_from() {
        let err: PipelineError = MetadataError::NotFound("42".to_string()).into();
        assert!(matches!(err, PipelineError::Metadata(_)));
        assert!(err.to_string().contains("42"));
    }
}
