//! Span ingest endpoint
//!
//! Bodies are wire messages (`{"data": [...]}`) handed to the data source's
//! notifier as-is; decoding and malformed-message accounting happen there.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc::error::TrySendError;

use super::IngestState;
use crate::api::types::ApiError;
use crate::core::constants::INGEST_RETRY_AFTER_SECS;

pub async fn ingest(
    State(state): State<IngestState>,
    Path(data_id): Path<String>,
    body: Bytes,
) -> Response {
    let Some(instance) = state.instances.get(&data_id) else {
        return ApiError::not_found("UNKNOWN_DATA_ID", format!("Unknown data id: {}", data_id))
            .into_response();
    };

    if body.is_empty() {
        return ApiError::bad_request("EMPTY_BODY", "Request body is empty").into_response();
    }

    match instance.sender().try_send(body.to_vec()) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(TrySendError::Full(_)) => {
            tracing::debug!(data_id = %data_id, "Notifier channel full, rejecting span batch");
            (
                [(
                    HeaderName::from_static("retry-after"),
                    INGEST_RETRY_AFTER_SECS.to_string(),
                )],
                ApiError::service_unavailable("Span channel is full"),
            )
                .into_response()
        }
        Err(TrySendError::Closed(_)) => {
            tracing::warn!(data_id = %data_id, "Notifier stopped, rejecting span batch");
            ApiError::service_unavailable("Data source is shutting down").into_response()
        }
    }
}
