//! Trace finalization
//!
//! For every expired trace the processor:
//!
//! 1. checks the Bloom filter for the trace's dedup key and, on a hit,
//!    replays spans finalized earlier (cache first, then a rate-limited
//!    document store query),
//! 2. aggregates the merged trace into a [`ProcessResult`],
//! 3. emits cache, Bloom, document and metrics requests to the storage proxy.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;

use super::error::PipelineError;
use super::fields::{
    HTTP_STATUS_CODE, RPC_GRPC_STATUS_CODE, SpanCategory, SpanKindCategory, infer_category,
};
use super::graph::{DiGraph, NodeDepth};
use super::index::IndexResolver;
use super::relation::RelationMetricsBuilder;
use super::span::StandardSpan;
use super::window::{CollectTrace, TraceHandler};
use crate::core::config::ProcessorConfig;
use crate::core::metadata::{BaseInfo, DataSourceMetadata};
use crate::data::StorageError;
use crate::data::cache::{self, CacheKey, RateLimitBucket, RateLimiter};
use crate::data::docstore::{Document, MAX_SEARCH_HITS};
use crate::data::storage::{BloomAdd, CacheWrite, SaveRequest, StorageProxy};
use crate::utils::time::dated_index;

/// Finalized aggregate of one trace, written to the result index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessResult {
    pub bk_tenant_id: String,
    pub biz_id: String,
    pub biz_name: String,
    pub app_id: String,
    pub app_name: String,
    pub trace_id: String,
    pub hierarchy_count: usize,
    pub service_count: usize,
    pub span_count: usize,
    pub min_start_time: i64,
    pub max_end_time: i64,
    pub trace_duration: i64,
    pub span_max_duration: i64,
    pub span_min_duration: i64,
    pub root_service: String,
    pub root_service_span_id: String,
    pub root_service_span_name: String,
    pub root_service_status_code: Option<i64>,
    pub root_service_category: String,
    pub root_service_kind: i32,
    pub root_span_id: String,
    pub root_span_name: String,
    pub root_span_service: String,
    pub root_span_kind: i32,
    pub error: bool,
    pub error_count: usize,
    /// Finalization time in microseconds
    pub time: i64,
    pub category_statistics: BTreeMap<SpanCategory, usize>,
    pub kind_statistics: BTreeMap<SpanKindCategory, usize>,
    /// Display key -> distinct values in first-seen order
    pub collections: BTreeMap<String, Vec<String>>,
}

/// Bloom key: app id followed by the first `prefix_len` characters of the trace id
pub fn dedup_key(app_id: &str, trace_id: &str, prefix_len: usize) -> String {
    let end = trace_id
        .char_indices()
        .nth(prefix_len)
        .map_or(trace_id.len(), |(idx, _)| idx);
    format!("{}{}", app_id, &trace_id[..end])
}

/// Lowest depth wins, then the earliest start
fn earliest_shallowest<'a>(nodes: impl Iterator<Item = NodeDepth<'a>>) -> Option<&'a StandardSpan> {
    nodes
        .min_by_key(|n| (n.depth, n.span.start_time))
        .map(|n| n.span)
}

/// A present status code always yields a value: integers as-is, floats
/// truncated, anything else 0.
fn parse_status_code(value: &str) -> i64 {
    value
        .parse::<i64>()
        .or_else(|_| value.parse::<f64>().map(|f| f as i64))
        .unwrap_or(0)
}

/// Aggregate a trace whose graph edges are fresh
pub fn aggregate(base: &BaseInfo, trace_id: &str, graph: &DiGraph, time_us: i64) -> ProcessResult {
    let spans = graph.spans();
    let mut services = std::collections::BTreeSet::new();
    let mut error_count = 0;
    let mut category_statistics: BTreeMap<SpanCategory, usize> =
        SpanCategory::ALL.iter().map(|c| (*c, 0)).collect();
    let mut kind_statistics: BTreeMap<SpanKindCategory, usize> =
        SpanKindCategory::ALL.iter().map(|k| (*k, 0)).collect();
    let mut collections: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for span in spans {
        if let Some(service) = span.service_name() {
            services.insert(service);
        }
        if span.is_error() {
            error_count += 1;
        }
        if let Some(category) = infer_category(span) {
            *category_statistics.entry(category).or_default() += 1;
        }
        *kind_statistics
            .entry(SpanKindCategory::from(span.kind))
            .or_default() += 1;

        for (key, value) in &span.collections {
            let values = collections.entry(key.clone()).or_default();
            if !values.contains(value) {
                values.push(value.clone());
            }
        }
    }

    let min_start_time = spans.iter().map(|s| s.start_time).min().unwrap_or_default();
    let max_end_time = spans.iter().map(|s| s.end_time).max().unwrap_or_default();
    let span_max_duration = spans.iter().map(|s| s.duration()).max().unwrap_or_default();
    let span_min_duration = spans.iter().map(|s| s.duration()).min().unwrap_or_default();

    let depths = graph.node_depths();
    let root_span = earliest_shallowest(depths.iter().copied());
    let root_service_span =
        earliest_shallowest(depths.iter().copied().filter(|n| n.span.kind.is_called()));

    let root_service_status_code = root_service_span
        .and_then(|span| span.field_any(&[HTTP_STATUS_CODE, RPC_GRPC_STATUS_CODE]))
        .map(parse_status_code);

    let owned = |value: Option<&str>| value.unwrap_or_default().to_string();

    ProcessResult {
        bk_tenant_id: base.bk_tenant_id.clone(),
        biz_id: base.biz_id.clone(),
        biz_name: base.biz_name.clone(),
        app_id: base.app_id.clone(),
        app_name: base.app_name.clone(),
        trace_id: trace_id.to_string(),
        hierarchy_count: graph.longest_path(),
        service_count: services.len(),
        span_count: spans.len(),
        min_start_time,
        max_end_time,
        trace_duration: max_end_time - min_start_time,
        span_max_duration,
        span_min_duration,
        root_service: owned(root_service_span.and_then(|s| s.service_name())),
        root_service_span_id: owned(root_service_span.map(|s| s.span_id.as_str())),
        root_service_span_name: owned(root_service_span.map(|s| s.span_name.as_str())),
        root_service_status_code,
        root_service_category: owned(
            root_service_span
                .and_then(infer_category)
                .map(|c| c.as_str()),
        ),
        root_service_kind: root_service_span.map_or(0, |s| i32::from(s.kind)),
        root_span_id: owned(root_span.map(|s| s.span_id.as_str())),
        root_span_name: owned(root_span.map(|s| s.span_name.as_str())),
        root_span_service: owned(root_span.and_then(|s| s.service_name())),
        root_span_kind: root_span.map_or(0, |s| i32::from(s.kind)),
        error: error_count > 0,
        error_count,
        time: time_us,
        category_statistics,
        kind_statistics,
        collections,
    }
}

pub struct Processor {
    data_id: String,
    config: ProcessorConfig,
    metadata: DataSourceMetadata,
    proxy: Arc<StorageProxy>,
    save_tx: mpsc::Sender<SaveRequest>,
    limiter: RateLimiter,
    query_bucket: RateLimitBucket,
    indices: IndexResolver,
    relations: RelationMetricsBuilder,
}

impl Processor {
    pub fn new(
        config: ProcessorConfig,
        metadata: DataSourceMetadata,
        proxy: Arc<StorageProxy>,
        save_tx: mpsc::Sender<SaveRequest>,
        duration_buckets: Vec<f64>,
    ) -> Self {
        let data_id = metadata.data_id.clone();
        let app_name = metadata.base_info.app_name.clone();
        tracing::debug!(
            data_id = %data_id,
            doc_query_rate_per_min = config.doc_query_rate_per_min,
            info_cache = config.info_cache_enabled,
            metrics_report = config.metrics_report_enabled,
            "Processor created"
        );

        Self {
            limiter: RateLimiter::new(proxy.cache().clone()),
            query_bucket: RateLimitBucket::doc_query(config.doc_query_rate_per_min),
            indices: IndexResolver::new(&metadata.trace_index, &app_name),
            relations: RelationMetricsBuilder::new(
                &data_id,
                &app_name,
                config.layer4_metrics_enabled,
                duration_buckets,
            ),
            data_id,
            config,
            metadata,
            proxy,
            save_tx,
        }
    }

    fn dedup_key(&self, trace_id: &str) -> String {
        dedup_key(
            &self.metadata.base_info.app_id,
            trace_id,
            self.config.dedup_prefix_len,
        )
    }

    fn record_replay(&self, outcome: &'static str) {
        metrics::counter!(
            "precalc_replay_total",
            "data_id" => self.data_id.clone(),
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Merge previously finalized spans of a trace seen before
    pub async fn pre_process(&self, trace: &mut CollectTrace) {
        if !self.config.info_report_enabled {
            return;
        }
        if !self.proxy.bloom_exists(&self.dedup_key(&trace.trace_id)) {
            return;
        }

        let history = self.load_history(&trace.trace_id).await;
        let mut merged = 0;
        for mut span in history {
            if trace.graph.contains_span(&span.span_id) {
                continue;
            }
            span.from_history = true;
            trace.push(Arc::new(span));
            merged += 1;
        }
        tracing::debug!(
            data_id = %self.data_id,
            trace_id = %trace.trace_id,
            merged,
            "Replayed trace"
        );
    }

    async fn load_history(&self, trace_id: &str) -> Vec<StandardSpan> {
        if self.config.info_cache_enabled {
            let key = CacheKey::trace_info(
                &self.metadata.base_info.biz_id,
                &self.metadata.base_info.app_name,
                trace_id,
            );
            match self.proxy.query_cache::<Vec<StandardSpan>>(&key).await {
                Ok(Some(spans)) if !spans.is_empty() => {
                    self.record_replay("cache_hit");
                    return spans;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        data_id = %self.data_id,
                        trace_id,
                        error = %e,
                        "Failed to read cached spans"
                    );
                    self.record_replay("cache_failed");
                }
            }
        }

        let limit = self.limiter.check(&self.query_bucket, &self.data_id).await;
        if !limit.allowed {
            tracing::debug!(
                data_id = %self.data_id,
                limit = limit.limit,
                "Document query over rate limit, skipping replay"
            );
            metrics::counter!(
                "precalc_rate_limited_total",
                "data_id" => self.data_id.clone(),
                "limiter" => self.query_bucket.name
            )
            .increment(1);
            return Vec::new();
        }

        let index = self.indices.resolve(&self.proxy).await;
        let docs = match self.proxy.search_spans(&index, trace_id, MAX_SEARCH_HITS).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!(
                    data_id = %self.data_id,
                    trace_id,
                    index = %index,
                    error = %e,
                    "Span query failed, result may be incomplete"
                );
                self.record_replay("query_failed");
                return Vec::new();
            }
        };

        if docs.is_empty() {
            tracing::info!(
                data_id = %self.data_id,
                trace_id,
                index = %index,
                "No stored spans for replayed trace"
            );
            self.record_replay("empty");
            return Vec::new();
        }

        self.record_replay("query_hit");
        docs.into_iter().filter_map(StandardSpan::from_document).collect()
    }

    /// Aggregate the trace and emit its storage requests
    pub async fn process(&self, mut trace: CollectTrace) -> Result<(), PipelineError> {
        trace.graph.refresh_edges();
        let now = Utc::now();

        if self.config.info_report_enabled {
            let result = aggregate(
                &self.metadata.base_info,
                &trace.trace_id,
                &trace.graph,
                now.timestamp_micros(),
            );

            if self.config.info_cache_enabled {
                let spans: Vec<&StandardSpan> = trace.spans.iter().map(|s| s.as_ref()).collect();
                match cache::encode(&spans) {
                    Ok(value) => {
                        let key = CacheKey::trace_info(
                            &self.metadata.base_info.biz_id,
                            &self.metadata.base_info.app_name,
                            &trace.trace_id,
                        );
                        self.send(SaveRequest::Cache(CacheWrite {
                            key,
                            value,
                            ttl: Some(self.config.cache_ttl),
                        }))
                        .await?;
                    }
                    Err(e) => {
                        tracing::warn!(
                            data_id = %self.data_id,
                            trace_id = %trace.trace_id,
                            error = %e,
                            "Failed to encode spans for cache"
                        );
                    }
                }
            }

            match serde_json::to_value(&result) {
                Ok(body) => {
                    self.send(SaveRequest::Document(Document {
                        index: dated_index(&self.metadata.result_index, &now),
                        id: trace.trace_id.clone(),
                        body,
                    }))
                    .await?;
                }
                Err(e) => {
                    tracing::warn!(
                        data_id = %self.data_id,
                        trace_id = %trace.trace_id,
                        error = %e,
                        "Failed to serialize trace result"
                    );
                }
            }
        }

        self.send(SaveRequest::Bloom(BloomAdd {
            key: self.dedup_key(&trace.trace_id),
        }))
        .await?;

        if self.config.metrics_report_enabled {
            let samples = self.relations.build(&trace.graph, now.timestamp_millis());
            if !samples.is_empty() {
                self.send(SaveRequest::Metrics(samples)).await?;
            }
        }

        tracing::trace!(
            data_id = %self.data_id,
            trace_id = %trace.trace_id,
            spans = trace.span_count(),
            "Trace finalized"
        );
        Ok(())
    }

    async fn send(&self, request: SaveRequest) -> Result<(), PipelineError> {
        self.save_tx
            .send(request)
            .await
            .map_err(|_| PipelineError::Storage(StorageError::ChannelClosed))
    }
}

#[async_trait]
impl TraceHandler for Processor {
    async fn handle(&self, mut trace: CollectTrace) -> Result<(), PipelineError> {
        self.pre_process(&mut trace).await;
        self.process(trace).await
    }
}
