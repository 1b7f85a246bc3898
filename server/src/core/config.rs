use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_BATCH_MAX_COUNT, DEFAULT_BATCH_MAX_INTERVAL_MS,
    DEFAULT_BLOOM_CAPACITY, DEFAULT_BLOOM_FP_RATE, DEFAULT_BLOOM_RESET_MINUTES,
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL_MINUTES, DEFAULT_DEDUP_PREFIX_LEN,
    DEFAULT_DOC_QUERY_RATE_PER_MIN, DEFAULT_DURATION_BUCKETS, DEFAULT_EXPIRE_INCREMENT_SECS,
    DEFAULT_EXPIRE_INTERVAL_SECS, DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT,
    DEFAULT_MAPPING_MAX_SPAN_COUNT, DEFAULT_MAX_DURATION_SECS, DEFAULT_MAX_SPAN_COUNT,
    DEFAULT_NO_DATA_MAX_DURATION_SECS, DEFAULT_NOTIFIER_CHANNEL_SIZE,
    DEFAULT_STORAGE_CHANNEL_SIZE, DEFAULT_STORAGE_WORKERS, DEFAULT_WINDOW_EVENT_CHANNEL_SIZE,
    DEFAULT_WINDOW_SCAN_INTERVAL_MS, DEFAULT_WINDOW_SHARDS, DEFAULT_WINDOW_WORKERS_PER_SHARD,
};

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Cache backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Field-wise overlay of one config layer onto another (other wins)
trait Merge {
    fn merge(&mut self, other: Self);
}

fn overlay<T>(current: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *current = other;
    }
}

fn merge_section<T: Merge + Default>(current: &mut Option<T>, other: Option<T>) {
    if let Some(other) = other {
        current.get_or_insert_with(T::default).merge(other);
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct WindowFileConfig {
    pub shards: Option<usize>,
    pub scan_interval_ms: Option<u64>,
    pub workers_per_shard: Option<usize>,
    pub event_channel_size: Option<usize>,
    pub mapping_max_span_count: Option<usize>,
}

impl Merge for WindowFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.shards, other.shards);
        overlay(&mut self.scan_interval_ms, other.scan_interval_ms);
        overlay(&mut self.workers_per_shard, other.workers_per_shard);
        overlay(&mut self.event_channel_size, other.event_channel_size);
        overlay(&mut self.mapping_max_span_count, other.mapping_max_span_count);
    }
}

/// Expiration policy section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RuntimeFileConfig {
    pub max_span_count: Option<usize>,
    pub expire_interval_secs: Option<u64>,
    pub expire_increment_secs: Option<u64>,
    pub max_duration_secs: Option<u64>,
    pub no_data_max_duration_secs: Option<u64>,
}

impl Merge for RuntimeFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.max_span_count, other.max_span_count);
        overlay(&mut self.expire_interval_secs, other.expire_interval_secs);
        overlay(&mut self.expire_increment_secs, other.expire_increment_secs);
        overlay(&mut self.max_duration_secs, other.max_duration_secs);
        overlay(
            &mut self.no_data_max_duration_secs,
            other.no_data_max_duration_secs,
        );
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProcessorFileConfig {
    pub info_cache_enabled: Option<bool>,
    pub info_report_enabled: Option<bool>,
    pub metrics_report_enabled: Option<bool>,
    pub layer4_metrics_enabled: Option<bool>,
    pub dedup_prefix_len: Option<usize>,
    pub doc_query_rate_per_min: Option<u32>,
    pub cache_ttl_minutes: Option<u64>,
}

impl Merge for ProcessorFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.info_cache_enabled, other.info_cache_enabled);
        overlay(&mut self.info_report_enabled, other.info_report_enabled);
        overlay(&mut self.metrics_report_enabled, other.metrics_report_enabled);
        overlay(&mut self.layer4_metrics_enabled, other.layer4_metrics_enabled);
        overlay(&mut self.dedup_prefix_len, other.dedup_prefix_len);
        overlay(&mut self.doc_query_rate_per_min, other.doc_query_rate_per_min);
        overlay(&mut self.cache_ttl_minutes, other.cache_ttl_minutes);
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct BloomFileConfig {
    pub fp_rate: Option<f64>,
    pub capacity: Option<usize>,
    pub reset_minutes: Option<u64>,
}

impl Merge for BloomFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.fp_rate, other.fp_rate);
        overlay(&mut self.capacity, other.capacity);
        overlay(&mut self.reset_minutes, other.reset_minutes);
    }
}

/// Relation/flow metrics output (nested under storage)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MetricsFileConfig {
    pub url: Option<String>,
    pub duration_buckets: Option<Vec<f64>>,
}

impl Merge for MetricsFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.url, other.url);
        overlay(&mut self.duration_buckets, other.duration_buckets);
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct StorageFileConfig {
    pub workers: Option<usize>,
    pub channel_size: Option<usize>,
    pub batch_max_count: Option<usize>,
    pub batch_max_interval_ms: Option<u64>,
    pub bloom: Option<BloomFileConfig>,
    pub metrics: Option<MetricsFileConfig>,
}

impl Merge for StorageFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.workers, other.workers);
        overlay(&mut self.channel_size, other.channel_size);
        overlay(&mut self.batch_max_count, other.batch_max_count);
        overlay(&mut self.batch_max_interval_ms, other.batch_max_interval_ms);
        merge_section(&mut self.bloom, other.bloom);
        merge_section(&mut self.metrics, other.metrics);
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub backend: Option<CacheBackendType>,
    pub max_entries: Option<u64>,
    pub redis_url: Option<String>,
}

impl Merge for CacheFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.backend, other.backend);
        overlay(&mut self.max_entries, other.max_entries);
        overlay(&mut self.redis_url, other.redis_url);
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DocumentStoreFileConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Merge for DocumentStoreFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.url, other.url);
        overlay(&mut self.username, other.username);
        overlay(&mut self.password, other.password);
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct NotifierFileConfig {
    pub channel_size: Option<usize>,
}

impl Merge for NotifierFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.channel_size, other.channel_size);
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct HttpFileConfig {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Merge for HttpFileConfig {
    fn merge(&mut self, other: Self) {
        overlay(&mut self.enabled, other.enabled);
        overlay(&mut self.host, other.host);
        overlay(&mut self.port, other.port);
    }
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub window: Option<WindowFileConfig>,
    pub runtime: Option<RuntimeFileConfig>,
    pub processor: Option<ProcessorFileConfig>,
    pub storage: Option<StorageFileConfig>,
    pub cache: Option<CacheFileConfig>,
    pub document_store: Option<DocumentStoreFileConfig>,
    pub notifier: Option<NotifierFileConfig>,
    pub http: Option<HttpFileConfig>,
    /// Replaced as a whole by a later layer
    pub data_sources: Option<Vec<DataSourceConfig>>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        merge_section(&mut self.window, other.window);
        merge_section(&mut self.runtime, other.runtime);
        merge_section(&mut self.processor, other.processor);
        merge_section(&mut self.storage, other.storage);
        merge_section(&mut self.cache, other.cache);
        merge_section(&mut self.document_store, other.document_store);
        merge_section(&mut self.notifier, other.notifier);
        merge_section(&mut self.http, other.http);
        if let Some(sources) = other.data_sources {
            tracing::trace!(count = sources.len(), "Merging data_sources");
            self.data_sources = Some(sources);
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub shards: usize,
    pub scan_interval: Duration,
    pub workers_per_shard: usize,
    pub event_channel_size: usize,
    /// Buffered span cap per shard
    pub mapping_max_span_count: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_WINDOW_SHARDS,
            scan_interval: Duration::from_millis(DEFAULT_WINDOW_SCAN_INTERVAL_MS),
            workers_per_shard: DEFAULT_WINDOW_WORKERS_PER_SHARD,
            event_channel_size: DEFAULT_WINDOW_EVENT_CHANNEL_SIZE,
            mapping_max_span_count: DEFAULT_MAPPING_MAX_SPAN_COUNT,
        }
    }
}

/// Expiration policy parameters
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_span_count: usize,
    pub expire_interval: Duration,
    pub expire_increment: Duration,
    pub max_duration: Duration,
    pub no_data_max_duration: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_span_count: DEFAULT_MAX_SPAN_COUNT,
            expire_interval: Duration::from_secs(DEFAULT_EXPIRE_INTERVAL_SECS),
            expire_increment: Duration::from_secs(DEFAULT_EXPIRE_INCREMENT_SECS),
            max_duration: Duration::from_secs(DEFAULT_MAX_DURATION_SECS),
            no_data_max_duration: Duration::from_secs(DEFAULT_NO_DATA_MAX_DURATION_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Cache the span list of each finalized trace for replay
    pub info_cache_enabled: bool,
    /// Write the trace result document (replay is skipped when off)
    pub info_report_enabled: bool,
    pub metrics_report_enabled: bool,
    pub layer4_metrics_enabled: bool,
    pub dedup_prefix_len: usize,
    pub doc_query_rate_per_min: u32,
    pub cache_ttl: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            info_cache_enabled: false,
            info_report_enabled: true,
            metrics_report_enabled: true,
            layer4_metrics_enabled: false,
            dedup_prefix_len: DEFAULT_DEDUP_PREFIX_LEN,
            doc_query_rate_per_min: DEFAULT_DOC_QUERY_RATE_PER_MIN,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_MINUTES * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BloomConfig {
    pub fp_rate: f64,
    pub capacity: usize,
    pub reset_interval: Duration,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            fp_rate: DEFAULT_BLOOM_FP_RATE,
            capacity: DEFAULT_BLOOM_CAPACITY,
            reset_interval: Duration::from_secs(DEFAULT_BLOOM_RESET_MINUTES * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Remote write endpoint; samples stay in memory when unset
    pub url: Option<String>,
    /// Flow duration buckets in seconds, ascending
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            url: None,
            duration_buckets: DEFAULT_DURATION_BUCKETS.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub workers: usize,
    pub channel_size: usize,
    pub batch_max_count: usize,
    pub batch_max_interval: Duration,
    pub bloom: BloomConfig,
    pub metrics: MetricsConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_STORAGE_WORKERS,
            channel_size: DEFAULT_STORAGE_CHANNEL_SIZE,
            batch_max_count: DEFAULT_BATCH_MAX_COUNT,
            batch_max_interval: Duration::from_millis(DEFAULT_BATCH_MAX_INTERVAL_MS),
            bloom: BloomConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub max_entries: u64,
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendType::Memory,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentStoreConfig {
    /// Elasticsearch-compatible base URL; in-memory store when unset
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub channel_size: usize,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

/// One tenant application stream
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataSourceConfig {
    pub data_id: String,
    #[serde(default)]
    pub bk_tenant_id: String,
    pub biz_id: String,
    #[serde(default)]
    pub biz_name: String,
    pub app_id: String,
    pub app_name: String,
    /// Result index base name; documents go to `{index_name}_{YYYYMMDD}`
    pub index_name: String,
    /// Span index base name, defaults to `{biz_id}_bkapm_trace_{app_name}`
    #[serde(default)]
    pub trace_index_name: Option<String>,
}

impl DataSourceConfig {
    pub fn trace_index(&self) -> String {
        self.trace_index_name
            .clone()
            .unwrap_or_else(|| format!("{}_bkapm_trace_{}", self.biz_id, self.app_name))
    }
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub runtime: RuntimeConfig,
    pub processor: ProcessorConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub document_store: DocumentStoreConfig,
    pub notifier: NotifierConfig,
    pub http: HttpConfig,
    pub data_sources: Vec<DataSourceConfig>,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.precalc/precalc.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::resolve(file_config, cli);
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, the merged file config and CLI/env overrides
    fn resolve(file_config: FileConfig, cli: &CliConfig) -> Self {
        let file_window = file_config.window.unwrap_or_default();
        let file_runtime = file_config.runtime.unwrap_or_default();
        let file_processor = file_config.processor.unwrap_or_default();
        let file_storage = file_config.storage.unwrap_or_default();
        let file_bloom = file_storage.bloom.unwrap_or_default();
        let file_metrics = file_storage.metrics.unwrap_or_default();
        let file_cache = file_config.cache.unwrap_or_default();
        let file_docstore = file_config.document_store.unwrap_or_default();
        let file_notifier = file_config.notifier.unwrap_or_default();
        let file_http = file_config.http.unwrap_or_default();

        let window = WindowConfig {
            shards: cli
                .window_shards
                .or(file_window.shards)
                .unwrap_or(DEFAULT_WINDOW_SHARDS),
            scan_interval: Duration::from_millis(
                file_window
                    .scan_interval_ms
                    .unwrap_or(DEFAULT_WINDOW_SCAN_INTERVAL_MS),
            ),
            workers_per_shard: cli
                .window_workers
                .or(file_window.workers_per_shard)
                .unwrap_or(DEFAULT_WINDOW_WORKERS_PER_SHARD),
            event_channel_size: file_window
                .event_channel_size
                .unwrap_or(DEFAULT_WINDOW_EVENT_CHANNEL_SIZE),
            mapping_max_span_count: file_window
                .mapping_max_span_count
                .unwrap_or(DEFAULT_MAPPING_MAX_SPAN_COUNT),
        };

        let runtime = RuntimeConfig {
            max_span_count: file_runtime
                .max_span_count
                .unwrap_or(DEFAULT_MAX_SPAN_COUNT),
            expire_interval: Duration::from_secs(
                file_runtime
                    .expire_interval_secs
                    .unwrap_or(DEFAULT_EXPIRE_INTERVAL_SECS),
            ),
            expire_increment: Duration::from_secs(
                file_runtime
                    .expire_increment_secs
                    .unwrap_or(DEFAULT_EXPIRE_INCREMENT_SECS),
            ),
            max_duration: Duration::from_secs(
                file_runtime
                    .max_duration_secs
                    .unwrap_or(DEFAULT_MAX_DURATION_SECS),
            ),
            no_data_max_duration: Duration::from_secs(
                file_runtime
                    .no_data_max_duration_secs
                    .unwrap_or(DEFAULT_NO_DATA_MAX_DURATION_SECS),
            ),
        };

        let processor_defaults = ProcessorConfig::default();
        let processor = ProcessorConfig {
            info_cache_enabled: file_processor
                .info_cache_enabled
                .unwrap_or(processor_defaults.info_cache_enabled),
            info_report_enabled: file_processor
                .info_report_enabled
                .unwrap_or(processor_defaults.info_report_enabled),
            metrics_report_enabled: file_processor
                .metrics_report_enabled
                .unwrap_or(processor_defaults.metrics_report_enabled),
            layer4_metrics_enabled: file_processor
                .layer4_metrics_enabled
                .unwrap_or(processor_defaults.layer4_metrics_enabled),
            dedup_prefix_len: file_processor
                .dedup_prefix_len
                .unwrap_or(DEFAULT_DEDUP_PREFIX_LEN),
            doc_query_rate_per_min: file_processor
                .doc_query_rate_per_min
                .unwrap_or(DEFAULT_DOC_QUERY_RATE_PER_MIN),
            cache_ttl: Duration::from_secs(
                file_processor
                    .cache_ttl_minutes
                    .unwrap_or(DEFAULT_CACHE_TTL_MINUTES)
                    * 60,
            ),
        };

        let storage = StorageConfig {
            workers: cli
                .storage_workers
                .or(file_storage.workers)
                .unwrap_or(DEFAULT_STORAGE_WORKERS),
            channel_size: file_storage
                .channel_size
                .unwrap_or(DEFAULT_STORAGE_CHANNEL_SIZE),
            batch_max_count: file_storage
                .batch_max_count
                .unwrap_or(DEFAULT_BATCH_MAX_COUNT),
            batch_max_interval: Duration::from_millis(
                file_storage
                    .batch_max_interval_ms
                    .unwrap_or(DEFAULT_BATCH_MAX_INTERVAL_MS),
            ),
            bloom: BloomConfig {
                fp_rate: file_bloom.fp_rate.unwrap_or(DEFAULT_BLOOM_FP_RATE),
                capacity: file_bloom.capacity.unwrap_or(DEFAULT_BLOOM_CAPACITY),
                reset_interval: Duration::from_secs(
                    file_bloom
                        .reset_minutes
                        .unwrap_or(DEFAULT_BLOOM_RESET_MINUTES)
                        * 60,
                ),
            },
            metrics: MetricsConfig {
                url: cli.metrics_url.clone().or(file_metrics.url),
                duration_buckets: file_metrics
                    .duration_buckets
                    .unwrap_or_else(|| DEFAULT_DURATION_BUCKETS.to_vec()),
            },
        };

        let cache_backend = cli.cache_backend.or(file_cache.backend).unwrap_or_default();
        let cache = CacheConfig {
            backend: cache_backend,
            max_entries: cli
                .cache_max_entries
                .or(file_cache.max_entries)
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            redis_url: cli.cache_redis_url.clone().or(file_cache.redis_url),
        };

        let document_store = DocumentStoreConfig {
            url: cli.document_store_url.clone().or(file_docstore.url),
            username: file_docstore.username,
            password: file_docstore.password,
        };

        let notifier = NotifierConfig {
            channel_size: file_notifier
                .channel_size
                .unwrap_or(DEFAULT_NOTIFIER_CHANNEL_SIZE),
        };

        let http = HttpConfig {
            enabled: cli.http_enabled.or(file_http.enabled).unwrap_or(false),
            host: cli
                .http_host
                .clone()
                .or(file_http.host)
                .unwrap_or_else(|| DEFAULT_HTTP_HOST.to_string()),
            port: cli.http_port.or(file_http.port).unwrap_or(DEFAULT_HTTP_PORT),
        };

        Self {
            window,
            runtime,
            processor,
            storage,
            cache,
            document_store,
            notifier,
            http,
            data_sources: file_config.data_sources.unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("window.shards", self.window.shards),
            ("window.workers_per_shard", self.window.workers_per_shard),
            ("window.event_channel_size", self.window.event_channel_size),
            (
                "window.mapping_max_span_count",
                self.window.mapping_max_span_count,
            ),
            ("runtime.max_span_count", self.runtime.max_span_count),
            ("storage.workers", self.storage.workers),
            ("storage.channel_size", self.storage.channel_size),
            ("storage.batch_max_count", self.storage.batch_max_count),
            ("storage.bloom.capacity", self.storage.bloom.capacity),
            ("notifier.channel_size", self.notifier.channel_size),
            ("processor.dedup_prefix_len", self.processor.dedup_prefix_len),
        ];
        for (name, value) in counts {
            if value == 0 {
                anyhow::bail!("Configuration error: {} must be greater than 0", name);
            }
        }

        let intervals = [
            ("window.scan_interval_ms", self.window.scan_interval),
            ("runtime.expire_interval_secs", self.runtime.expire_interval),
            ("runtime.max_duration_secs", self.runtime.max_duration),
            (
                "runtime.no_data_max_duration_secs",
                self.runtime.no_data_max_duration,
            ),
            (
                "storage.batch_max_interval_ms",
                self.storage.batch_max_interval,
            ),
            ("storage.bloom.reset_minutes", self.storage.bloom.reset_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                anyhow::bail!("Configuration error: {} must be greater than 0", name);
            }
        }

        let fp_rate = self.storage.bloom.fp_rate;
        if !(fp_rate > 0.0 && fp_rate < 1.0) {
            anyhow::bail!(
                "Configuration error: storage.bloom.fp_rate must be between 0 and 1 (got {})",
                fp_rate
            );
        }

        if self
            .storage
            .metrics
            .duration_buckets
            .windows(2)
            .any(|w| w[0] >= w[1])
        {
            anyhow::bail!(
                "Configuration error: storage.metrics.duration_buckets must be ascending"
            );
        }

        if self.cache.backend == CacheBackendType::Redis
            && self.cache.redis_url.as_ref().is_none_or(|u| u.is_empty())
        {
            anyhow::bail!(
                "Configuration error: cache.redis_url is required when cache.backend is 'redis'"
            );
        }

        if self.http.enabled && self.http.port == 0 {
            anyhow::bail!("Configuration error: http.port must be greater than 0");
        }

        let mut seen = HashSet::new();
        for source in &self.data_sources {
            if source.data_id.is_empty() {
                anyhow::bail!("Configuration error: data_sources entry with empty data_id");
            }
            if !seen.insert(source.data_id.as_str()) {
                anyhow::bail!(
                    "Configuration error: duplicate data source '{}'",
                    source.data_id
                );
            }
        }

        if self.data_sources.is_empty() {
            tracing::warn!("No data sources configured, nothing will be processed");
        }
        if self.window.mapping_max_span_count < self.runtime.max_span_count {
            tracing::warn!(
                mapping_max_span_count = self.window.mapping_max_span_count,
                max_span_count = self.runtime.max_span_count,
                "Shard span cap is below the per-trace span limit"
            );
        }

        Ok(())
    }
}

/// Get the profile config path (~/.precalc/precalc.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_json(json: &str) -> AppConfig {
        let file: FileConfig = serde_json::from_str(json).unwrap();
        AppConfig::resolve(file, &CliConfig::default())
    }

    fn data_source(data_id: &str) -> DataSourceConfig {
        DataSourceConfig {
            data_id: data_id.to_string(),
            bk_tenant_id: "system".to_string(),
            biz_id: "2".to_string(),
            biz_name: "demo".to_string(),
            app_id: "1".to_string(),
            app_name: "shop".to_string(),
            index_name: "2_bkapm_precalculate_shop".to_string(),
            trace_index_name: None,
        }
    }

    #[test]
    fn test_cache_backend_serde() {
        let backend: CacheBackendType = serde_json::from_str(r#""redis""#).unwrap();
        assert_eq!(backend, CacheBackendType::Redis);
        assert_eq!(CacheBackendType::Memory.to_string(), "memory");
    }

    #[test]
    fn test_defaults() {
        let config = resolve_json("{}");
        assert_eq!(config.window.shards, 3);
        assert_eq!(config.window.scan_interval, Duration::from_millis(500));
        assert_eq!(config.window.workers_per_shard, 50);
        assert_eq!(config.runtime.max_span_count, 10_000);
        assert_eq!(config.runtime.max_duration, Duration::from_secs(300));
        assert!(!config.processor.info_cache_enabled);
        assert!(config.processor.info_report_enabled);
        assert_eq!(config.processor.dedup_prefix_len, 16);
        assert_eq!(config.processor.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.storage.workers, 10);
        assert_eq!(config.storage.batch_max_count, 30);
        assert_eq!(config.storage.bloom.reset_interval, Duration::from_secs(7200));
        assert_eq!(config.cache.backend, CacheBackendType::Memory);
        assert!(config.document_store.url.is_none());
        assert!(!config.http.enabled);
        assert_eq!(config.http.port, 10205);
        assert!(config.data_sources.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_file_config_parse_nested() {
        let config = resolve_json(
            r#"{
                "window": { "shards": 8, "scan_interval_ms": 100 },
                "storage": { "bloom": { "fp_rate": 0.001 }, "metrics": { "url": "http://sink" } },
                "processor": { "info_cache_enabled": true, "cache_ttl_minutes": 10 },
                "data_sources": [
                    { "data_id": "1001", "biz_id": "2", "app_id": "1", "app_name": "shop",
                      "index_name": "2_bkapm_precalculate_shop" }
                ]
            }"#,
        );
        assert_eq!(config.window.shards, 8);
        assert_eq!(config.window.scan_interval, Duration::from_millis(100));
        assert_eq!(config.storage.bloom.fp_rate, 0.001);
        assert_eq!(config.storage.bloom.capacity, DEFAULT_BLOOM_CAPACITY);
        assert_eq!(config.storage.metrics.url.as_deref(), Some("http://sink"));
        assert!(config.processor.info_cache_enabled);
        assert_eq!(config.processor.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.data_sources.len(), 1);
        assert_eq!(
            config.data_sources[0].trace_index(),
            "2_bkapm_trace_shop"
        );
    }

    #[test]
    fn test_file_config_parse_extra_fields() {
        let json = r#"{ "window": { "shards": 2 }, "unknown_field": 123 }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.extra.get("unknown_field").unwrap(), 123);
    }

    #[test]
    fn test_file_config_merge() {
        let mut base: FileConfig = serde_json::from_str(
            r#"{
                "window": { "shards": 2, "workers_per_shard": 4 },
                "storage": { "bloom": { "capacity": 10 } },
                "data_sources": [ { "data_id": "a", "biz_id": "2", "app_id": "1",
                                    "app_name": "x", "index_name": "i" } ]
            }"#,
        )
        .unwrap();
        let overlay: FileConfig = serde_json::from_str(
            r#"{
                "window": { "shards": 6 },
                "storage": { "bloom": { "fp_rate": 0.05 } },
                "data_sources": []
            }"#,
        )
        .unwrap();

        base.merge(overlay);

        let window = base.window.as_ref().unwrap();
        assert_eq!(window.shards, Some(6));
        assert_eq!(window.workers_per_shard, Some(4));
        let bloom = base.storage.as_ref().unwrap().bloom.as_ref().unwrap();
        assert_eq!(bloom.capacity, Some(10));
        assert_eq!(bloom.fp_rate, Some(0.05));
        assert_eq!(base.data_sources, Some(Vec::new()));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: FileConfig = serde_json::from_str(
            r#"{
                "window": { "shards": 2 },
                "cache": { "backend": "memory" },
                "http": { "port": 9000 }
            }"#,
        )
        .unwrap();
        let cli = CliConfig {
            window_shards: Some(5),
            cache_backend: Some(CacheBackendType::Redis),
            cache_redis_url: Some("redis://127.0.0.1:6379/0".to_string()),
            http_port: Some(9100),
            ..CliConfig::default()
        };

        let config = AppConfig::resolve(file, &cli);
        assert_eq!(config.window.shards, 5);
        assert_eq!(config.cache.backend, CacheBackendType::Redis);
        assert_eq!(config.http.port, 9100);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_counts_and_intervals() {
        let mut config = resolve_json("{}");
        config.window.shards = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("window.shards"));

        let mut config = resolve_json("{}");
        config.storage.batch_max_interval = Duration::ZERO;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("storage.batch_max_interval_ms"));

        let mut config = resolve_json("{}");
        config.processor.dedup_prefix_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_fp_rate_range() {
        let mut config = resolve_json("{}");
        config.storage.bloom.fp_rate = 1.0;
        assert!(config.validate().is_err());
        config.storage.bloom.fp_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_redis_url_required() {
        let mut config = resolve_json("{}");
        config.cache.backend = CacheBackendType::Redis;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("cache.redis_url"));
    }

    #[test]
    fn test_validate_duplicate_data_ids() {
        let mut config = resolve_json("{}");
        config.data_sources = vec![data_source("1001"), data_source("1002")];
        config.validate().unwrap();

        config.data_sources.push(data_source("1001"));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate data source '1001'"));
    }

    #[test]
    fn test_validate_bucket_order() {
        let mut config = resolve_json("{}");
        config.storage.metrics.duration_buckets = vec![1.0, 0.5];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trace_index_override() {
        let mut source = data_source("1001");
        source.trace_index_name = Some("custom_trace".to_string());
        assert_eq!(source.trace_index(), "custom_trace");
    }
}
