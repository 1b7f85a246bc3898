//! Document store for finalized traces and replayable spans
//!
//! - `MemoryDocumentStore`: in-process store, used when no URL is configured
//!   and as the test double
//! - `ElasticsearchStore`: HTTP client for `_bulk`, `_search` and `_cat/indices`

mod elasticsearch;
mod error;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use elasticsearch::ElasticsearchStore;
pub use error::DocStoreError;
pub use memory::MemoryDocumentStore;

/// Upper bound of hits returned by a span search
pub const MAX_SEARCH_HITS: usize = 10_000;

/// One JSON document addressed by index and id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub index: String,
    pub id: String,
    pub body: Value,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace every document in one round trip
    async fn bulk_upsert(&self, documents: &[Document]) -> Result<(), DocStoreError>;

    /// Source bodies of documents in `index` whose `trace_id` matches.
    /// `index` may end with `*`; at most `limit` hits are returned.
    async fn search_by_trace_id(
        &self,
        index: &str,
        trace_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>, DocStoreError>;

    /// Names of indices matching `pattern` (trailing `*` wildcard)
    async fn list_indices(&self, pattern: &str) -> Result<Vec<String>, DocStoreError>;

    fn backend_name(&self) -> &'static str;
}

/// Match an index name against a pattern with an optional trailing `*`
pub(crate) fn index_matches(pattern: &str, index: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => index.starts_with(prefix),
        None => index == pattern,
    }
}
