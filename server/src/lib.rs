//! Trace pre-calculation pipeline
//!
//! - `core` - configuration, CLI, shutdown coordination and metadata lookup
//! - `data` - cache, bloom filters, document store, metrics sink and the storage dispatcher
//! - `domain` - span model, trace graph, windowing and trace finalization
//! - `api` - optional HTTP ingest surface

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
