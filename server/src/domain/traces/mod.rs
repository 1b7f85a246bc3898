//! Trace pre-calculation pipeline
//!
//! - `span` - wire format and the normalized `StandardSpan`
//! - `fields` - standard field table and span categories
//! - `graph` - parent/child graph, depths and call pairs
//! - `runtime` - expiration state machine
//! - `window` - hash-sharded trace buffers and finalize workers
//! - `index` - newest span index resolution for replay
//! - `relation` - relation and flow metric extraction
//! - `processor` - replay, aggregation and storage requests
//! - `notifier` - raw message decoding
//! - `pipeline` - per data source wiring

pub mod error;
pub mod fields;
pub mod graph;
pub mod index;
pub mod notifier;
pub mod pipeline;
pub mod processor;
pub mod relation;
pub mod runtime;
pub mod span;
pub mod window;

pub use error::PipelineError;
pub use pipeline::{RunInstance, SharedBackends};
pub use processor::{ProcessResult, Processor};
pub use span::{StandardSpan, WireMessage};
pub use window::{CollectTrace, DistributiveWindow, TraceHandler};
