use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::CacheBackendType;
use super::constants::{
    ENV_CACHE_BACKEND, ENV_CACHE_MAX_ENTRIES, ENV_CACHE_REDIS_URL, ENV_CONFIG,
    ENV_DOCUMENT_STORE_URL, ENV_HTTP_ENABLED, ENV_HTTP_HOST, ENV_HTTP_PORT, ENV_METRICS_URL,
    ENV_STORAGE_WORKERS, ENV_WINDOW_SHARDS, ENV_WINDOW_WORKERS,
};

#[derive(Parser)]
#[command(name = "precalc")]
#[command(version, about = "APM trace pre-calculation pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    // Cache options
    /// Cache backend (memory or redis)
    #[arg(long, global = true, env = ENV_CACHE_BACKEND, value_parser = parse_cache_backend_type)]
    pub cache_backend: Option<CacheBackendType>,

    /// Maximum number of in-memory cache entries
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES)]
    pub cache_max_entries: Option<u64>,

    /// Redis-compatible cache URL (redis://host:port/db)
    #[arg(long, global = true, env = ENV_CACHE_REDIS_URL)]
    pub cache_redis_url: Option<String>,

    // Window options
    /// Number of window shards per data source
    #[arg(long, global = true, env = ENV_WINDOW_SHARDS)]
    pub window_shards: Option<usize>,

    /// Finalize workers per shard
    #[arg(long, global = true, env = ENV_WINDOW_WORKERS)]
    pub window_workers: Option<usize>,

    // Storage options
    /// Storage dispatcher workers per data source
    #[arg(long, global = true, env = ENV_STORAGE_WORKERS)]
    pub storage_workers: Option<usize>,

    /// Document store URL (in-memory store when unset)
    #[arg(long, global = true, env = ENV_DOCUMENT_STORE_URL)]
    pub document_store_url: Option<String>,

    /// Metrics remote write URL (in-memory sink when unset)
    #[arg(long, global = true, env = ENV_METRICS_URL)]
    pub metrics_url: Option<String>,

    // HTTP ingest options
    /// Enable the HTTP span ingest endpoint
    #[arg(long, global = true, env = ENV_HTTP_ENABLED)]
    pub http_enabled: Option<bool>,

    /// HTTP ingest host address
    #[arg(long, short = 'H', global = true, env = ENV_HTTP_HOST)]
    pub http_host: Option<String>,

    /// HTTP ingest port
    #[arg(long, short = 'p', global = true, env = ENV_HTTP_PORT)]
    pub http_port: Option<u16>,
}

/// Parse cache backend type from CLI/env string
fn parse_cache_backend_type(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        _ => Err(format!(
            "Invalid cache backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the pipeline (default command)
    Start,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub cache_backend: Option<CacheBackendType>,
    pub cache_max_entries: Option<u64>,
    pub cache_redis_url: Option<String>,
    pub window_shards: Option<usize>,
    pub window_workers: Option<usize>,
    pub storage_workers: Option<usize>,
    pub document_store_url: Option<String>,
    pub metrics_url: Option<String>,
    pub http_enabled: Option<bool>,
    pub http_host: Option<String>,
    pub http_port: Option<u16>,
}

impl From<Cli> for CliConfig {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            cache_backend: cli.cache_backend,
            cache_max_entries: cli.cache_max_entries,
            cache_redis_url: cli.cache_redis_url,
            window_shards: cli.window_shards,
            window_workers: cli.window_workers,
            storage_workers: cli.storage_workers,
            document_store_url: cli.document_store_url,
            metrics_url: cli.metrics_url,
            http_enabled: cli.http_enabled,
            http_host: cli.http_host,
            http_port: cli.http_port,
        }
    }
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let mut cli = Cli::parse();
    let command = cli.command.take();
    (cli.into(), command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_backend_type() {
        assert_eq!(
            parse_cache_backend_type("Redis").unwrap(),
            CacheBackendType::Redis
        );
        assert!(parse_cache_backend_type("memcached").is_err());
    }

    #[test]
    fn test_cli_flags_map_to_config() {
        let cli = Cli::parse_from([
            "precalc",
            "--window-shards",
            "8",
            "--storage-workers",
            "4",
            "--cache-backend",
            "redis",
            "check-config",
        ]);
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));

        let config = CliConfig::from(cli);
        assert_eq!(config.window_shards, Some(8));
        assert_eq!(config.storage_workers, Some(4));
        assert_eq!(config.cache_backend, Some(CacheBackendType::Redis));
        assert!(config.http_port.is_none());
    }
}
