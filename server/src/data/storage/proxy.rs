//! Batched multi-backend storage dispatcher
//!
//! ```text
//!  processors ──▶ bounded channel ──▶ M workers ──┬─▶ document buffer ──▶ bulk upsert
//!                                                 ├─▶ cache buffer    ──▶ set
//!                                                 ├─▶ metrics buffer  ──▶ write
//!                                                 └─▶ bloom add (immediate)
//! ```
//!
//! Every worker flushes a buffer when it reaches `batch_max_count` or when
//! the worker's interval ticks, whichever comes first. Flush failures are
//! logged and counted, never retried.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::request::{CacheWrite, SaveRequest};
use crate::core::config::StorageConfig;
use crate::data::StorageError;
use crate::data::bloom::BloomFilter;
use crate::data::cache::CacheService;
use crate::data::docstore::{Document, DocumentStore};
use crate::data::sink::{MetricSample, MetricsSink};

/// Backends shared by the dispatcher workers and the replay queries
#[derive(Clone)]
pub struct StorageBackends {
    pub cache: Arc<CacheService>,
    pub documents: Arc<dyn DocumentStore>,
    pub bloom: Arc<dyn BloomFilter>,
    pub metrics: Arc<dyn MetricsSink>,
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Count,
    Interval,
    Shutdown,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Interval => "interval",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Default)]
struct Buffers {
    documents: Vec<Document>,
    caches: Vec<CacheWrite>,
    metrics: Vec<MetricSample>,
    /// Metrics requests buffered, the count trigger for `metrics`
    metric_requests: usize,
}

pub struct StorageProxy {
    data_id: String,
    config: StorageConfig,
    backends: StorageBackends,
    tx: mpsc::Sender<SaveRequest>,
    rx: Arc<AsyncMutex<mpsc::Receiver<SaveRequest>>>,
}

impl StorageProxy {
    pub fn new(data_id: &str, config: StorageConfig, backends: StorageBackends) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_size.max(1));
        Self {
            data_id: data_id.to_string(),
            config,
            backends,
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
        }
    }

    /// Sender side of the request channel
    pub fn sender(&self) -> mpsc::Sender<SaveRequest> {
        self.tx.clone()
    }

    /// Start the workers; the returned handle completes after the final
    /// flush of every worker and the cache close
    pub fn start(self: &Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let workers: Vec<JoinHandle<()>> = (0..self.config.workers.max(1))
            .map(|worker_id| {
                let proxy = self.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move { proxy.run_worker(worker_id, shutdown_rx).await })
            })
            .collect();

        tracing::debug!(
            data_id = %self.data_id,
            workers = workers.len(),
            batch_max_count = self.config.batch_max_count,
            "Storage proxy started"
        );

        let proxy = self.clone();
        tokio::spawn(async move {
            for result in futures::future::join_all(workers).await {
                if let Err(e) = result {
                    tracing::error!(
                        data_id = %proxy.data_id,
                        error = %e,
                        "Storage worker task failed"
                    );
                }
            }
            proxy.backends.cache.close().await;
            tracing::debug!(data_id = %proxy.data_id, "Storage proxy stopped");
        })
    }

    async fn run_worker(&self, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        let mut buffers = Buffers::default();
        let period = self.config.batch_max_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.flush_all(&mut buffers, FlushTrigger::Interval).await;
                }
                request = async { self.rx.lock().await.recv().await } => match request {
                    Some(request) => self.accept(request, &mut buffers).await,
                    None => break,
                },
            }
        }

        // Stop accepting, then drain whatever is already queued
        {
            let mut rx = self.rx.lock().await;
            rx.close();
            while let Ok(request) = rx.try_recv() {
                self.accept(request, &mut buffers).await;
            }
        }
        self.flush_all(&mut buffers, FlushTrigger::Shutdown).await;
        tracing::trace!(data_id = %self.data_id, worker = worker_id, "Storage worker stopped");
    }

    async fn accept(&self, request: SaveRequest, buffers: &mut Buffers) {
        let max = self.config.batch_max_count.max(1);
        match request {
            SaveRequest::Bloom(add) => self.backends.bloom.add(&add.key),
            SaveRequest::Document(doc) => {
                buffers.documents.push(doc);
                if buffers.documents.len() >= max {
                    self.flush_documents(buffers, FlushTrigger::Count).await;
                }
            }
            SaveRequest::Cache(write) => {
                buffers.caches.push(write);
                if buffers.caches.len() >= max {
                    self.flush_caches(buffers, FlushTrigger::Count).await;
                }
            }
            SaveRequest::Metrics(samples) => {
                buffers.metrics.extend(samples);
                buffers.metric_requests += 1;
                if buffers.metric_requests >= max {
                    self.flush_metrics(buffers, FlushTrigger::Count).await;
                }
            }
        }
    }

    async fn flush_all(&self, buffers: &mut Buffers, trigger: FlushTrigger) {
        self.flush_documents(buffers, trigger).await;
        self.flush_caches(buffers, trigger).await;
        self.flush_metrics(buffers, trigger).await;
    }

    async fn flush_documents(&self, buffers: &mut Buffers, trigger: FlushTrigger) {
        if buffers.documents.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut buffers.documents);
        let result = self.backends.documents.bulk_upsert(&batch).await;
        self.record_flush("document", trigger, batch.len(), result.map_err(Into::into));
    }

    async fn flush_caches(&self, buffers: &mut Buffers, trigger: FlushTrigger) {
        if buffers.caches.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut buffers.caches);
        let count = batch.len();
        let mut result = Ok(());
        for write in batch {
            if let Err(e) = self
                .backends
                .cache
                .set_raw(&write.key, write.value, write.ttl)
                .await
            {
                result = Err(e.into());
            }
        }
        self.record_flush("cache", trigger, count, result);
    }

    async fn flush_metrics(&self, buffers: &mut Buffers, trigger: FlushTrigger) {
        if buffers.metrics.is_empty() {
            buffers.metric_requests = 0;
            return;
        }
        let batch = std::mem::take(&mut buffers.metrics);
        buffers.metric_requests = 0;
        let result = self.backends.metrics.write(&batch).await;
        self.record_flush("metrics", trigger, batch.len(), result.map_err(Into::into));
    }

    fn record_flush(
        &self,
        target: &'static str,
        trigger: FlushTrigger,
        count: usize,
        result: Result<(), StorageError>,
    ) {
        let status = match &result {
            Ok(()) => {
                tracing::trace!(
                    data_id = %self.data_id,
                    backend = target,
                    trigger = trigger.as_str(),
                    count,
                    "Storage flush"
                );
                "success"
            }
            Err(e) => {
                tracing::warn!(
                    data_id = %self.data_id,
                    backend = target,
                    trigger = trigger.as_str(),
                    count,
                    error = %e,
                    "Storage flush failed"
                );
                "failure"
            }
        };
        metrics::counter!(
            "precalc_storage_flush_total",
            "data_id" => self.data_id.clone(),
            "target" => target,
            "trigger" => trigger.as_str(),
            "status" => status
        )
        .increment(1);
    }

    // ========================================================================
    // Queries used by replay
    // ========================================================================

    pub async fn query_cache<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        Ok(self.backends.cache.get(key).await?)
    }

    pub fn bloom_exists(&self, key: &str) -> bool {
        self.backends.bloom.contains(key)
    }

    pub async fn search_spans(
        &self,
        index: &str,
        trace_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        Ok(self
            .backends
            .documents
            .search_by_trace_id(index, trace_id, limit)
            .await?)
    }

    pub async fn list_indices(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.backends.documents.list_indices(pattern).await?)
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.backends.cache
    }
}
