//! Per data source pipeline
//!
//! ```text
//!  raw bytes ──▶ Notifier ──▶ span channel ──▶ DistributiveWindow ──▶ Processor ──▶ StorageProxy
//!                                              (shards + scanner)     (workers)     (batched writes)
//! ```
//!
//! A [`RunInstance`] owns one data id's chain. The storage proxy does not
//! listen to the shutdown signal itself: it is stopped once every window
//! task has returned, so requests sent by in-flight finalize workers are
//! still flushed.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::error::PipelineError;
use super::notifier::Notifier;
use super::processor::Processor;
use super::runtime::RuntimeStrategies;
use super::window::DistributiveWindow;
use crate::core::config::AppConfig;
use crate::core::metadata::MetadataProvider;
use crate::core::shutdown::ShutdownService;
use crate::data::bloom::OverlapBloom;
use crate::data::cache::CacheService;
use crate::data::docstore::DocumentStore;
use crate::data::sink::MetricsSink;
use crate::data::storage::{StorageBackends, StorageProxy};

/// Backends shared by every data source. Bloom filters are per data source.
#[derive(Clone)]
pub struct SharedBackends {
    pub cache: Arc<CacheService>,
    pub documents: Arc<dyn DocumentStore>,
    pub metrics: Arc<dyn MetricsSink>,
}

pub struct RunInstance {
    data_id: String,
    raw_tx: mpsc::Sender<Vec<u8>>,
    window: Arc<DistributiveWindow>,
}

impl RunInstance {
    /// Look up the data source, wire its components and start their tasks
    pub async fn start(
        data_id: &str,
        config: &AppConfig,
        provider: &dyn MetadataProvider,
        shared: &SharedBackends,
        errors_tx: mpsc::Sender<PipelineError>,
        shutdown: &ShutdownService,
    ) -> Result<Self, PipelineError> {
        let metadata = provider.lookup(data_id).await?;
        let app_name = metadata.base_info.app_name.clone();

        let bloom_config = &config.storage.bloom;
        let bloom = Arc::new(OverlapBloom::new(
            bloom_config.capacity,
            bloom_config.fp_rate,
            bloom_config.reset_interval,
        ));

        let proxy = Arc::new(StorageProxy::new(
            data_id,
            config.storage.clone(),
            StorageBackends {
                cache: shared.cache.clone(),
                documents: shared.documents.clone(),
                bloom: bloom.clone(),
                metrics: shared.metrics.clone(),
            },
        ));

        let processor = Arc::new(Processor::new(
            config.processor.clone(),
            metadata,
            proxy.clone(),
            proxy.sender(),
            config.storage.metrics.duration_buckets.clone(),
        ));

        let window = Arc::new(DistributiveWindow::new(
            data_id,
            config.window.clone(),
            RuntimeStrategies::standard(config.runtime.clone()),
        ));

        let (spans_tx, spans_rx) = mpsc::channel(config.window.event_channel_size.max(1));
        let (raw_tx, raw_rx) = mpsc::channel(config.notifier.channel_size.max(1));
        let notifier = Arc::new(Notifier::new(data_id, spans_tx));

        let (storage_stop_tx, storage_stop_rx) = watch::channel(false);
        let storage = proxy.start(storage_stop_rx);
        let window_tasks = window.start(spans_rx, processor, errors_tx, shutdown.subscribe());

        shutdown
            .register(notifier.start(raw_rx, shutdown.subscribe()))
            .await;
        shutdown
            .register(stop_storage_after(data_id, window_tasks, storage_stop_tx, storage))
            .await;
        shutdown
            .register(bloom.spawn_rotation(shutdown.subscribe()))
            .await;

        tracing::info!(
            data_id,
            app_name = %app_name,
            shards = config.window.shards,
            "Data source started"
        );

        Ok(Self {
            data_id: data_id.to_string(),
            raw_tx,
            window,
        })
    }

    pub fn data_id(&self) -> &str {
        &self.data_id
    }

    /// Entry point for raw wire messages
    pub fn sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.raw_tx.clone()
    }

    /// Traces currently buffered across all shards
    pub fn buffered_traces(&self) -> usize {
        self.window.trace_count()
    }
}

/// Wait for every upstream task, then signal the storage proxy and wait for
/// its final flush
fn stop_storage_after(
    data_id: &str,
    upstream: Vec<JoinHandle<()>>,
    storage_stop: watch::Sender<bool>,
    storage: JoinHandle<()>,
) -> JoinHandle<()> {
    let data_id = data_id.to_string();
    tokio::spawn(async move {
        for handle in upstream {
            if let Err(e) = handle.await {
                tracing::warn!(data_id = %data_id, error = %e, "Window task ended abnormally");
            }
        }
        let _ = storage_stop.send(true);
        if let Err(e) = storage.await {
            tracing::warn!(data_id = %data_id, error = %e, "Storage proxy ended abnormally");
        }
    })
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::testing::{app_config, shared};
    use super::*;
    use crate::core::metadata::{MetadataError, StaticMetadataProvider};
    use crate::data::docstore::{Document, MemoryDocumentStore};
    use crate::data::sink::MemoryMetricsSink;
    use crate::data::storage::SaveRequest;

    #[tokio::test(start_paused = true)]
    async fn test_message_flows_to_storage() {
        let config = app_config();
        let provider = StaticMetadataProvider::new(&config.data_sources);
        let documents = Arc::new(MemoryDocumentStore::new());
        let metrics = Arc::new(MemoryMetricsSink::new());
        let shared = shared(documents.clone(), metrics.clone()).await;
        let (errors_tx, _errors_rx) = mpsc::channel(8);
        let shutdown = ShutdownService::new();

        let instance = RunInstance::start("1001", &config, &provider, &shared, errors_tx, &shutdown)
            .await
            .unwrap();
        assert_eq!(instance.data_id(), "1001");

        let message = json!({
            "data": [
                {
                    "trace_id": "4bf92f3577b34da6a3ce929d0e0e4736",
                    "span_id": "a",
                    "span_name": "GET /",
                    "start_time": 1_000,
                    "end_time": 2_000,
                    "kind": 2,
                    "resource": { "service.name": "api" }
                },
                {
                    "trace_id": "4bf92f3577b34da6a3ce929d0e0e4736",
                    "span_id": "b",
                    "parent_span_id": "a",
                    "span_name": "SELECT",
                    "start_time": 1_100,
                    "end_time": 1_500,
                    "kind": 3,
                    "attributes": { "db.system": "mysql" },
                    "resource": { "service.name": "api" }
                }
            ]
        });
        instance
            .sender()
            .send(serde_json::to_vec(&message).unwrap())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(instance.buffered_traces(), 0);
        assert_eq!(documents.document_count(), 1);
        assert!(metrics.batch_count() >= 1);

        shutdown.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_flushes_requests_sent_during_shutdown() {
        let config = app_config();
        let documents = Arc::new(MemoryDocumentStore::new());
        let shared = shared(documents.clone(), Arc::new(MemoryMetricsSink::new())).await;
        let proxy = Arc::new(StorageProxy::new(
            "1001",
            config.storage.clone(),
            StorageBackends {
                cache: shared.cache.clone(),
                documents: shared.documents.clone(),
                bloom: Arc::new(OverlapBloom::new(1_000, 0.01, Duration::from_secs(3600))),
                metrics: shared.metrics.clone(),
            },
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        let storage = proxy.start(stop_rx);
        let tx = proxy.sender();
        let slow_worker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(SaveRequest::Document(Document {
                index: "2_bkapm_precalculate_shop_20240101".to_string(),
                id: "t1".to_string(),
                body: json!({ "trace_id": "t1" }),
            }))
            .await
            .unwrap();
        });

        stop_storage_after("1001", vec![slow_worker], stop_tx, storage)
            .await
            .unwrap();
        assert_eq!(documents.document_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_data_id_fails() {
        let config = app_config();
        let provider = StaticMetadataProvider::new(&config.data_sources);
        let shared = shared(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryMetricsSink::new()),
        )
        .await;
        let (errors_tx, _errors_rx) = mpsc::channel(8);
        let shutdown = ShutdownService::new();

        let result =
            RunInstance::start("9999", &config, &provider, &shared, errors_tx, &shutdown).await;
        assert!(matches!(
            result,
            Err(PipelineError::Metadata(MetadataError::NotFound(_)))
        ));
    }
}
