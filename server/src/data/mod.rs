//! Data layer
//!
//! - `cache` - in-memory and Redis caching with rate limiting
//! - `bloom` - dedup filters for finalized traces
//! - `docstore` - document store for results and replayable spans
//! - `sink` - metrics sink for relation and flow samples
//! - `storage` - batched dispatcher in front of all of the above
//! - `error` - storage error type

pub mod bloom;
pub mod cache;
pub mod docstore;
pub mod error;
pub mod sink;
pub mod storage;

pub use error::StorageError;
