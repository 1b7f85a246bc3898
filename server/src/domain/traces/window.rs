//! Hash-sharded trace window
//!
//! ```text
//!  spans ──▶ route(xxh64 % shards) ──▶ shard buffer ──scan──▶ events ──▶ N workers ──▶ handler
//! ```
//!
//! Each shard owns a `FxHashMap<trace_id, CollectTrace>` behind one mutex.
//! `scan` removes expired traces under that mutex before handing them to the
//! shard's bounded event channel, so a trace is handed off at most once.
//! A semaphore per shard caps the number of buffered spans; the permits a
//! trace holds are released after its handler returns.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use twox_hash::XxHash64;

use super::error::PipelineError;
use super::graph::DiGraph;
use super::runtime::{Runtime, RuntimeStrategies};
use super::span::StandardSpan;
use crate::core::config::WindowConfig;

// ============================================================================
// TYPES
// ============================================================================

/// All buffered spans of one trace plus its expiration state
#[derive(Debug)]
pub struct CollectTrace {
    pub trace_id: String,
    pub spans: Vec<Arc<StandardSpan>>,
    pub graph: DiGraph,
    pub runtime: Runtime,
    /// Backpressure permits held by this trace
    permits: usize,
}

impl CollectTrace {
    pub fn new(trace_id: String, runtime: Runtime) -> Self {
        Self {
            trace_id,
            spans: Vec::new(),
            graph: DiGraph::new(),
            runtime,
            permits: 0,
        }
    }

    /// Add a span to the list and the graph
    pub fn push(&mut self, span: Arc<StandardSpan>) {
        self.graph.add_node(span.clone());
        self.spans.push(span);
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

/// Receives expired traces from the finalize workers
#[async_trait]
pub trait TraceHandler: Send + Sync {
    async fn handle(&self, trace: CollectTrace) -> Result<(), PipelineError>;
}

/// Shard index for a trace id. Pure for a given shard count.
pub fn route(trace_id: &str, shards: usize) -> usize {
    (XxHash64::oneshot(0, trace_id.as_bytes()) % shards.max(1) as u64) as usize
}

struct SubWindow {
    traces: Mutex<FxHashMap<String, CollectTrace>>,
    events_tx: mpsc::Sender<CollectTrace>,
    events_rx: Arc<AsyncMutex<mpsc::Receiver<CollectTrace>>>,
    permits: Arc<Semaphore>,
}

// ============================================================================
// WINDOW
// ============================================================================

pub struct DistributiveWindow {
    data_id: String,
    config: WindowConfig,
    strategies: RuntimeStrategies,
    shards: Vec<SubWindow>,
}

impl DistributiveWindow {
    pub fn new(data_id: &str, config: WindowConfig, strategies: RuntimeStrategies) -> Self {
        let shards = (0..config.shards.max(1))
            .map(|_| {
                let (events_tx, events_rx) = mpsc::channel(config.event_channel_size.max(1));
                SubWindow {
                    traces: Mutex::new(FxHashMap::default()),
                    events_tx,
                    events_rx: Arc::new(AsyncMutex::new(events_rx)),
                    permits: Arc::new(Semaphore::new(config.mapping_max_span_count)),
                }
            })
            .collect();

        Self {
            data_id: data_id.to_string(),
            config,
            strategies,
            shards,
        }
    }

    pub fn route(&self, trace_id: &str) -> usize {
        route(trace_id, self.shards.len())
    }

    /// Buffered trace count across all shards
    pub fn trace_count(&self) -> usize {
        self.shards.iter().map(|s| s.traces.lock().len()).sum()
    }

    /// Buffer one span, waiting for a backpressure permit if the shard is full
    pub async fn append(&self, span: StandardSpan) {
        let shard_id = self.route(&span.trace_id);
        let shard = &self.shards[shard_id];

        match shard.permits.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => {
                tracing::warn!(
                    data_id = %self.data_id,
                    shard = shard_id,
                    "Shard semaphore closed, dropping span"
                );
                return;
            }
        }

        let now = Instant::now();
        let span = Arc::new(span);
        let mut traces = shard.traces.lock();
        match traces.get_mut(&span.trace_id) {
            Some(trace) => {
                trace.push(span);
                trace.permits += 1;
                let count = trace.span_count();
                self.strategies.handle_exist(&mut trace.runtime, count, now);
            }
            None => {
                let trace_id = span.trace_id.clone();
                let mut trace =
                    CollectTrace::new(trace_id.clone(), self.strategies.handle_new(now));
                trace.push(span);
                trace.permits = 1;
                tracing::trace!(
                    data_id = %self.data_id,
                    shard = shard_id,
                    trace_id = %trace_id,
                    "New trace buffered"
                );
                traces.insert(trace_id, trace);
            }
        }
    }

    pub async fn append_batch(&self, spans: Vec<StandardSpan>) {
        metrics::counter!("precalc_spans_received_total", "data_id" => self.data_id.clone())
            .increment(spans.len() as u64);
        for span in spans {
            self.append(span).await;
        }
    }

    /// Hand every expired trace to its shard's event channel; returns how many
    pub async fn scan(&self, now: Instant) -> usize {
        let mut total = 0;
        for (shard_id, shard) in self.shards.iter().enumerate() {
            let expired: Vec<CollectTrace> = {
                let mut traces = shard.traces.lock();
                let ids: Vec<String> = traces
                    .iter_mut()
                    .filter_map(|(id, trace)| {
                        self.strategies
                            .predicate(&mut trace.runtime, now)
                            .then(|| id.clone())
                    })
                    .collect();
                ids.iter().filter_map(|id| traces.remove(id)).collect()
            };

            if expired.is_empty() {
                continue;
            }

            let count = expired.len();
            tracing::debug!(data_id = %self.data_id, shard = shard_id, count, "Traces expired");
            metrics::counter!(
                "precalc_traces_expired_total",
                "data_id" => self.data_id.clone(),
                "shard" => shard_id.to_string()
            )
            .increment(count as u64);

            for trace in expired {
                if shard.events_tx.send(trace).await.is_err() {
                    tracing::warn!(
                        data_id = %self.data_id,
                        shard = shard_id,
                        "Event channel closed, dropping expired trace"
                    );
                }
            }
            total += count;
        }
        total
    }

    /// Start ingestion, the scan ticker and the finalize workers
    pub fn start(
        self: &Arc<Self>,
        spans_rx: mpsc::Receiver<Vec<StandardSpan>>,
        handler: Arc<dyn TraceHandler>,
        errors_tx: mpsc::Sender<PipelineError>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.spawn_ingestion(spans_rx, shutdown_rx.clone()),
            self.spawn_scanner(shutdown_rx.clone()),
        ];

        for shard_id in 0..self.shards.len() {
            for worker_id in 0..self.config.workers_per_shard.max(1) {
                handles.push(self.spawn_worker(
                    shard_id,
                    worker_id,
                    handler.clone(),
                    errors_tx.clone(),
                    shutdown_rx.clone(),
                ));
            }
        }

        tracing::debug!(
            data_id = %self.data_id,
            shards = self.shards.len(),
            workers_per_shard = self.config.workers_per_shard,
            "Window started"
        );
        handles
    }

    fn spawn_ingestion(
        self: &Arc<Self>,
        mut spans_rx: mpsc::Receiver<Vec<StandardSpan>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let window = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    batch = spans_rx.recv() => match batch {
                        Some(batch) => {
                            tokio::select! {
                                _ = window.append_batch(batch) => {}
                                _ = shutdown_rx.wait_for(|&v| v) => break,
                            }
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!(data_id = %window.data_id, "Window ingestion stopped");
        })
    }

    fn spawn_scanner(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let window = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window.config.scan_interval);
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
                        tokio::select! {
                            _ = window.scan(Instant::now()) => {}
                            _ = shutdown_rx.wait_for(|&v| v) => break,
                        }
                    }
                }
            }
            tracing::debug!(data_id = %window.data_id, "Window scanner stopped");
        })
    }

    fn spawn_worker(
        self: &Arc<Self>,
        shard_id: usize,
        worker_id: usize,
        handler: Arc<dyn TraceHandler>,
        errors_tx: mpsc::Sender<PipelineError>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let data_id = self.data_id.clone();
        let events_rx = self.shards[shard_id].events_rx.clone();
        let permits = self.shards[shard_id].permits.clone();

        tokio::spawn(async move {
            loop {
                let trace = tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    trace = async { events_rx.lock().await.recv().await } => match trace {
                        Some(trace) => trace,
                        None => break,
                    },
                };

                let held = trace.permits;
                let trace_id = trace.trace_id.clone();
                let started = Instant::now();

                match AssertUnwindSafe(handler.handle(trace)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(
                            data_id = %data_id,
                            trace_id = %trace_id,
                            error = %e,
                            "Trace handling failed"
                        );
                        let _ = errors_tx.send(e).await;
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(
                            data_id = %data_id,
                            shard = shard_id,
                            worker = worker_id,
                            trace_id = %trace_id,
                            message = %message,
                            "Finalize worker panicked"
                        );
                        let _ = errors_tx
                            .send(PipelineError::Panic {
                                data_id: data_id.clone(),
                                message,
                            })
                            .await;
                    }
                }

                permits.add_permits(held);
                metrics::histogram!(
                    "precalc_finalize_duration_seconds",
                    "data_id" => data_id.clone()
                )
                .record(started.elapsed().as_secs_f64());
            }
            tracing::trace!(
                data_id = %data_id,
                shard = shard_id,
                worker = worker_id,
                "Finalize worker stopped"
            );
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
