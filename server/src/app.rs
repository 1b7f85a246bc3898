//! Core application

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::{ApiServer, IngestState};
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG, ERROR_CHANNEL_SIZE};
use crate::core::metadata::{MetadataProvider, StaticMetadataProvider};
use crate::core::shutdown::ShutdownService;
use crate::data::cache::CacheService;
use crate::data::docstore::{DocumentStore, ElasticsearchStore, MemoryDocumentStore};
use crate::data::sink::{HttpMetricsSink, MemoryMetricsSink, MetricsSink};
use crate::domain::{PipelineError, RunInstance, SharedBackends};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub shared: SharedBackends,
    pub metadata: Arc<dyn MetadataProvider>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::CheckConfig) => return Self::check_config(&cli_config),
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        app.start().await
    }

    fn check_config(cli: &CliConfig) -> Result<()> {
        let config = AppConfig::load(cli)?;
        println!(
            "Configuration OK: {} data source(s), {} shard(s), cache backend {}",
            config.data_sources.len(),
            config.window.shards,
            config.cache.backend
        );
        Ok(())
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;

        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .context("Failed to initialize cache service")?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let documents: Arc<dyn DocumentStore> = if config.document_store.url.is_some() {
            Arc::new(
                ElasticsearchStore::new(&config.document_store)
                    .context("Failed to initialize document store")?,
            )
        } else {
            tracing::warn!("No document store URL configured, results are kept in memory");
            Arc::new(MemoryDocumentStore::new())
        };

        let metrics: Arc<dyn MetricsSink> = match config.storage.metrics.url.as_deref() {
            Some(url) => {
                Arc::new(HttpMetricsSink::new(url).context("Failed to initialize metrics sink")?)
            }
            None => Arc::new(MemoryMetricsSink::new()),
        };

        let metadata: Arc<dyn MetadataProvider> =
            Arc::new(StaticMetadataProvider::new(&config.data_sources));

        Ok(Self {
            shutdown: ShutdownService::new(),
            config,
            shared: SharedBackends {
                cache,
                documents,
                metrics,
            },
            metadata,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start(self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        self.shutdown.install_signal_handlers();

        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_SIZE);
        let supervisor = spawn_error_supervisor(errors_rx);

        let instances = self.start_data_sources(&errors_tx).await;
        drop(errors_tx);

        banner::print_banner(
            &self.config,
            self.shared.documents.backend_name(),
            self.shared.metrics.backend_name(),
        );

        if self.config.http.enabled {
            let server = ApiServer::new(&self.config.http, IngestState::new(instances))?;
            let shutdown = self.shutdown.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = server.start(shutdown.clone()).await {
                    tracing::error!(error = %e, "HTTP ingest server error");
                    shutdown.trigger();
                }
            });
            self.shutdown.register(handle).await;
        } else if instances.is_empty() {
            tracing::warn!("No data source is running");
        }

        self.shutdown.wait().await;
        tracing::info!("Shutting down");
        self.shutdown.shutdown().await;

        // The supervisor ends once every pipeline task dropped its error sender
        if tokio::time::timeout(Duration::from_secs(1), supervisor)
            .await
            .is_err()
        {
            tracing::debug!("Error supervisor still has open senders");
        }
        Ok(())
    }

    /// Start one pipeline per configured data id. A failing data source is
    /// reported on the error channel and skipped.
    async fn start_data_sources(
        &self,
        errors_tx: &mpsc::Sender<PipelineError>,
    ) -> Vec<Arc<RunInstance>> {
        let mut instances: Vec<Arc<RunInstance>> = Vec::new();

        for data_id in self.metadata.data_ids() {
            if instances.iter().any(|i| i.data_id() == data_id) {
                let _ = errors_tx
                    .send(PipelineError::Config {
                        data_id,
                        message: "Data source already running".to_string(),
                    })
                    .await;
                continue;
            }

            match RunInstance::start(
                &data_id,
                &self.config,
                self.metadata.as_ref(),
                &self.shared,
                errors_tx.clone(),
                &self.shutdown,
            )
            .await
            {
                Ok(instance) => instances.push(Arc::new(instance)),
                Err(e) => {
                    tracing::error!(data_id = %data_id, error = %e, "Failed to start data source");
                    let _ = errors_tx.send(e).await;
                }
            }
        }

        tracing::info!(running = instances.len(), "Data sources started");
        instances
    }
}

/// Log every pipeline error until all senders are gone
fn spawn_error_supervisor(mut errors_rx: mpsc::Receiver<PipelineError>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(error) = errors_rx.recv().await {
            match &error {
                PipelineError::Panic { data_id, .. } => {
                    tracing::error!(data_id = %data_id, error = %error, "Pipeline task panicked");
                }
                PipelineError::Config { data_id, .. } => {
                    tracing::error!(
                        data_id = %data_id,
                        error = %error,
                        "Data source misconfigured"
                    );
                }
                PipelineError::Metadata(_) | PipelineError::Storage(_) => {
                    tracing::error!(error = %error, "Pipeline error");
                }
            }
        }
        tracing::debug!("Error supervisor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_supervisor_stops_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let supervisor = spawn_error_supervisor(rx);
        tx.send(PipelineError::Config {
            data_id: "1001".to_string(),
            message: "bad".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        supervisor.await.unwrap();
    }
}
