// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Precalc";

/// Application name in lowercase (for paths, identifiers and the log filter)
pub const APP_NAME_LOWER: &str = "precalc";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".precalc";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "precalc.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "PRECALC_CONFIG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "PRECALC_LOG";

// =============================================================================
// Environment Variables - Overrides
// =============================================================================

pub const ENV_CACHE_BACKEND: &str = "PRECALC_CACHE_BACKEND";
pub const ENV_CACHE_MAX_ENTRIES: &str = "PRECALC_CACHE_MAX_ENTRIES";
pub const ENV_CACHE_REDIS_URL: &str = "PRECALC_CACHE_REDIS_URL";
pub const ENV_WINDOW_SHARDS: &str = "PRECALC_WINDOW_SHARDS";
pub const ENV_WINDOW_WORKERS: &str = "PRECALC_WINDOW_WORKERS";
pub const ENV_STORAGE_WORKERS: &str = "PRECALC_STORAGE_WORKERS";
pub const ENV_DOCUMENT_STORE_URL: &str = "PRECALC_DOCUMENT_STORE_URL";
pub const ENV_METRICS_URL: &str = "PRECALC_METRICS_URL";
pub const ENV_HTTP_ENABLED: &str = "PRECALC_HTTP_ENABLED";
pub const ENV_HTTP_HOST: &str = "PRECALC_HTTP_HOST";
pub const ENV_HTTP_PORT: &str = "PRECALC_HTTP_PORT";

// =============================================================================
// Window Defaults
// =============================================================================

pub const DEFAULT_WINDOW_SHARDS: usize = 3;
pub const DEFAULT_WINDOW_SCAN_INTERVAL_MS: u64 = 500;
pub const DEFAULT_WINDOW_WORKERS_PER_SHARD: usize = 50;
pub const DEFAULT_WINDOW_EVENT_CHANNEL_SIZE: usize = 1000;

/// Buffered span cap per shard (backpressure)
pub const DEFAULT_MAPPING_MAX_SPAN_COUNT: usize = 100_000;

// =============================================================================
// Expiration Defaults
// =============================================================================

/// Reentry past this span count force-expires a trace
pub const DEFAULT_MAX_SPAN_COUNT: usize = 10_000;
pub const DEFAULT_EXPIRE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_EXPIRE_INCREMENT_SECS: u64 = 60;
pub const DEFAULT_MAX_DURATION_SECS: u64 = 300;
pub const DEFAULT_NO_DATA_MAX_DURATION_SECS: u64 = 120;

// =============================================================================
// Processor Defaults
// =============================================================================

pub const DEFAULT_DEDUP_PREFIX_LEN: usize = 16;
pub const DEFAULT_DOC_QUERY_RATE_PER_MIN: u32 = 20;
pub const DEFAULT_CACHE_TTL_MINUTES: u64 = 5;

/// Newest span index is re-resolved after this long
pub const INDEX_REFRESH_INTERVAL_SECS: u64 = 24 * 60 * 60;

// =============================================================================
// Storage Defaults
// =============================================================================

pub const DEFAULT_STORAGE_WORKERS: usize = 10;
pub const DEFAULT_STORAGE_CHANNEL_SIZE: usize = 1000;
pub const DEFAULT_BATCH_MAX_COUNT: usize = 30;
pub const DEFAULT_BATCH_MAX_INTERVAL_MS: u64 = 1000;

pub const DEFAULT_BLOOM_FP_RATE: f64 = 0.01;
pub const DEFAULT_BLOOM_CAPACITY: usize = 1_000_000;
pub const DEFAULT_BLOOM_RESET_MINUTES: u64 = 120;

/// Flow duration histogram buckets (seconds)
pub const DEFAULT_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

// =============================================================================
// Cache
// =============================================================================

pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

/// Version prefix of internal cache keys
pub const CACHE_KEY_VERSION: &str = "v1";

/// Fixed window of the rate limiter
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

// =============================================================================
// Channels
// =============================================================================

pub const DEFAULT_NOTIFIER_CHANNEL_SIZE: usize = 1000;

/// Pipeline error channel shared by every data source
pub const ERROR_CHANNEL_SIZE: usize = 1024;

// =============================================================================
// HTTP Ingest
// =============================================================================

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 10205;

/// Request body limit for span ingest (16 MiB)
pub const HTTP_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Retry-After sent when a notifier channel is full
pub const INGEST_RETRY_AFTER_SECS: u64 = 1;

// =============================================================================
// Shutdown
// =============================================================================

/// Upper bound for draining tasks on shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 60;
