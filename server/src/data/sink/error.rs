use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsSinkError {
    #[error("Metrics sink configuration error: {0}")]
    Config(String),

    #[error("Metrics sink rejected batch: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
