//! Domain logic
//!
//! - `traces` - windowing, finalization and relation metrics of APM traces

pub mod traces;

pub use traces::{PipelineError, RunInstance, SharedBackends};
