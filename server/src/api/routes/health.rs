//! Health check endpoint

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use super::IngestState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub data_sources: usize,
    /// Traces buffered in windows right now
    pub buffered_traces: usize,
}

pub async fn health(State(state): State<IngestState>) -> impl IntoResponse {
    let buffered_traces = state
        .instances
        .values()
        .map(|instance| instance.buffered_traces())
        .sum();
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            data_sources: state.instances.len(),
            buffered_traces,
        }),
    )
}
