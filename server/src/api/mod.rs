//! HTTP ingest surface
//!
//! - `POST /api/v1/spans/{data_id}` feeds a wire message to the data source's notifier
//! - `GET /health` reports running data sources and buffered traces

pub mod routes;
mod server;
pub mod types;

pub use routes::IngestState;
pub use server::ApiServer;
