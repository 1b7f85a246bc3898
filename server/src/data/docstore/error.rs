use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocStoreError {
    #[error("Document store configuration error: {0}")]
    Config(String),

    #[error("Document store request failed ({operation}): {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("Bulk upsert rejected {failed} of {total} documents")]
    BulkRejected { failed: usize, total: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DocStoreError {
    pub fn request(operation: &'static str, msg: impl Into<String>) -> Self {
        Self::Request {
            operation,
            message: msg.into(),
        }
    }
}
