use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MetricSample, MetricsSink, MetricsSinkError};

#[derive(Default)]
pub struct MemoryMetricsSink {
    batches: Mutex<Vec<Vec<MetricSample>>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// All samples written so far, in write order
    pub fn samples(&self) -> Vec<MetricSample> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn write(&self, samples: &[MetricSample]) -> Result<(), MetricsSinkError> {
        self.batches.lock().push(samples.to_vec());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
