use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{DocStoreError, Document, DocumentStore, index_matches};

/// In-process document store
///
/// Keeps documents per index in id order and records the size of every bulk
/// call so batching behaviour can be asserted.
#[derive(Default)]
pub struct MemoryDocumentStore {
    indices: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    bulk_calls: Mutex<Vec<usize>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes of the bulk calls received so far
    pub fn bulk_calls(&self) -> Vec<usize> {
        self.bulk_calls.lock().clone()
    }

    pub fn get(&self, index: &str, id: &str) -> Option<Value> {
        self.indices.lock().get(index)?.get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.indices.lock().values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn bulk_upsert(&self, documents: &[Document]) -> Result<(), DocStoreError> {
        self.bulk_calls.lock().push(documents.len());
        let mut indices = self.indices.lock();
        for doc in documents {
            indices
                .entry(doc.index.clone())
                .or_default()
                .insert(doc.id.clone(), doc.body.clone());
        }
        Ok(())
    }

    async fn search_by_trace_id(
        &self,
        index: &str,
        trace_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>, DocStoreError> {
        let indices = self.indices.lock();
        let hits = indices
            .iter()
            .filter(|(name, _)| index_matches(index, name))
            .flat_map(|(_, docs)| docs.values())
            .filter(|body| body.get("trace_id").and_then(Value::as_str) == Some(trace_id))
            .take(limit)
            .cloned()
            .collect();
        Ok(hits)
    }

    async fn list_indices(&self, pattern: &str) -> Result<Vec<String>, DocStoreError> {
        Ok(self
            .indices
            .lock()
            .keys()
            .filter(|name| index_matches(pattern, name))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
