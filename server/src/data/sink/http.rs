use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{MetricSample, MetricsSink, MetricsSinkError};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Posts sample batches as JSON to a remote write endpoint
#[derive(Debug)]
pub struct HttpMetricsSink {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    samples: &'a [MetricSample],
}

impl HttpMetricsSink {
    pub fn new(url: &str) -> Result<Self, MetricsSinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| MetricsSinkError::Config(format!("failed to build HTTP client: {}", e)))?;

        tracing::debug!(url = %url, "HTTP metrics sink initialized");
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl MetricsSink for HttpMetricsSink {
    async fn write(&self, samples: &[MetricSample]) -> Result<(), MetricsSinkError> {
        if samples.is_empty() {
            return Ok(());
        }

        let resp = self
            .client
            .post(&self.url)
            .json(&WriteRequest { samples })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(MetricsSinkError::Rejected(format!(
                "POST {} returned {}",
                self.url,
                resp.status()
            )));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_write_request_shape() {
        let labels = BTreeMap::from([("le".to_string(), "+Inf".to_string())]);
        let samples = vec![MetricSample::new("flow_bucket", labels, 2.0, 1_700_000_000_000)];
        let json = serde_json::to_value(WriteRequest { samples: &samples }).unwrap();
        assert_eq!(json["samples"][0]["name"], "flow_bucket");
        assert_eq!(json["samples"][0]["labels"]["le"], "+Inf");
        assert_eq!(json["samples"][0]["value"], 2.0);
    }
}
