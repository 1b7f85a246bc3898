//! Storage dispatcher: one bounded channel, M batching workers

mod proxy;
mod request;

pub use proxy::{StorageBackends, StorageProxy};
pub use request::{BloomAdd, CacheWrite, SaveRequest};
