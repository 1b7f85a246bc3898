//! API server initialization

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

use super::routes::{IngestState, health, spans};
use crate::core::config::HttpConfig;
use crate::core::constants::HTTP_MAX_BODY_BYTES;
use crate::core::shutdown::ShutdownService;

pub struct ApiServer {
    addr: SocketAddr,
    state: IngestState,
}

impl ApiServer {
    pub fn new(config: &HttpConfig, state: IngestState) -> Result<Self> {
        let addr = SocketAddr::new(config.host.parse()?, config.port);
        Ok(Self { addr, state })
    }

    pub fn router(state: IngestState) -> Router {
        Router::new()
            .route("/health", get(health::health))
            .route("/api/v1/spans/{data_id}", post(spans::ingest))
            .with_state(state)
            .layer(RequestDecompressionLayer::new())
            .layer(DefaultBodyLimit::max(HTTP_MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until shutdown is triggered
    pub async fn start(self, shutdown: ShutdownService) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::debug!(addr = %self.addr, "HTTP ingest listening");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::debug!("HTTP ingest stopped");
        Ok(())
    }
}
