//! Save requests accepted by the storage dispatcher

use std::time::Duration;

use crate::data::docstore::Document;
use crate::data::sink::MetricSample;

/// Encoded cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheWrite {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BloomAdd {
    pub key: String,
}

/// One write for one backend
#[derive(Debug, Clone, PartialEq)]
pub enum SaveRequest {
    Cache(CacheWrite),
    Document(Document),
    Bloom(BloomAdd),
    Metrics(Vec<MetricSample>),
}

impl SaveRequest {
    /// Backend label used in logs and flush counters
    pub fn target(&self) -> &'static str {
        match self {
            Self::Cache(_) => "cache",
            Self::Document(_) => "document",
            Self::Bloom(_) => "bloom",
            Self::Metrics(_) => "metrics",
        }
    }
}
