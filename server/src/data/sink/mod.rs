//! Metrics sink for relation and flow samples
//!
//! Samples are written in batches by the storage dispatcher. The HTTP sink
//! posts them as JSON; the memory sink keeps them for inspection.

mod error;
mod http;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::MetricsSinkError;
pub use http::HttpMetricsSink;
pub use memory::MemoryMetricsSink;

/// One named sample with its label set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Unix milliseconds
    pub timestamp_ms: i64,
}

impl MetricSample {
    pub fn new(
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
        value: f64,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            name: name.into(),
            labels,
            value,
            timestamp_ms,
        }
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, samples: &[MetricSample]) -> Result<(), MetricsSinkError>;

    fn backend_name(&self) -> &'static str;
}
