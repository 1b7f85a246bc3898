use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{DocStoreError, Document, DocumentStore};
use crate::core::config::DocumentStoreConfig;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Elasticsearch-compatible HTTP document store
#[derive(Debug)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, Option<String>)>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Deserialize)]
struct CatIndex {
    index: String,
}

impl ElasticsearchStore {
    pub fn new(config: &DocumentStoreConfig) -> Result<Self, DocStoreError> {
        let base_url = config
            .url
            .as_deref()
            .ok_or_else(|| DocStoreError::Config("document store URL required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DocStoreError::Config(format!("failed to build HTTP client: {}", e)))?;

        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone()));

        tracing::debug!(url = %base_url, "Elasticsearch document store initialized");
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }
}

/// One `index` action line plus the source line per document
fn bulk_body(documents: &[Document]) -> String {
    let mut body = String::new();
    for doc in documents {
        let action = json!({ "index": { "_index": doc.index, "_id": doc.id } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&doc.body.to_string());
        body.push('\n');
    }
    body
}

fn failed_items(items: &[Value]) -> usize {
    items
        .iter()
        .filter(|item| {
            item.as_object()
                .and_then(|actions| actions.values().next())
                .is_some_and(|result| result.get("error").is_some())
        })
        .count()
}

fn search_body(trace_id: &str, limit: usize) -> Value {
    json!({
        "size": limit,
        "query": { "bool": { "filter": [ { "term": { "trace_id": trace_id } } ] } },
        "sort": [ { "start_time": "asc" } ]
    })
}

fn search_hits(body: &Value) -> Vec<Value> {
    body["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source").cloned())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn bulk_upsert(&self, documents: &[Document]) -> Result<(), DocStoreError> {
        if documents.is_empty() {
            return Ok(());
        }

        let resp = self
            .request(reqwest::Method::POST, "_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(documents))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DocStoreError::request(
                "bulk",
                format!("returned {}", resp.status()),
            ));
        }

        let body: BulkResponse = resp.json().await?;
        if body.errors {
            return Err(DocStoreError::BulkRejected {
                failed: failed_items(&body.items),
                total: documents.len(),
            });
        }
        Ok(())
    }

    async fn search_by_trace_id(
        &self,
        index: &str,
        trace_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>, DocStoreError> {
        let resp = self
            .request(reqwest::Method::POST, &format!("{}/_search", index))
            .json(&search_body(trace_id, limit))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DocStoreError::request(
                "search",
                format!("{} returned {}", index, resp.status()),
            ));
        }

        let body: Value = resp.json().await?;
        Ok(search_hits(&body))
    }

    async fn list_indices(&self, pattern: &str) -> Result<Vec<String>, DocStoreError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("_cat/indices/{}?format=json&h=index", pattern),
            )
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(DocStoreError::request(
                "cat_indices",
                format!("{} returned {}", pattern, resp.status()),
            ));
        }

        let indices: Vec<CatIndex> = resp.json().await?;
        Ok(indices.into_iter().map(|i| i.index).collect())
    }

    fn backend_name(&self) -> &'static str {
        "elasticsearch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_body_is_ndjson() {
        let docs = vec![Document {
            index: "result_20240101".to_string(),
            id: "t1".to_string(),
            body: json!({ "trace_id": "t1" }),
        }];
        let body = bulk_body(&docs);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({ "index": { "_index": "result_20240101", "_id": "t1" } })
        );
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_failed_items_counts_errors() {
        let items = vec![
            json!({ "index": { "status": 201 } }),
            json!({ "index": { "status": 400, "error": { "type": "mapper_parsing_exception" } } }),
        ];
        assert_eq!(failed_items(&items), 1);
    }

    #[test]
    fn test_search_hits_extracts_sources() {
        let body = json!({
            "hits": { "hits": [ { "_source": { "span_id": "a" } }, { "_id": "x" } ] }
        });
        assert_eq!(search_hits(&body), vec![json!({ "span_id": "a" })]);
        assert!(search_hits(&json!({})).is_empty());
    }

    #[test]
    fn test_new_requires_url() {
        let config = DocumentStoreConfig::default();
        assert!(matches!(
            ElasticsearchStore::new(&config),
            Err(DocStoreError::Config(_))
        ));
    }

    #[test]
    fn test_search_body_is_bounded() {
        let body = search_body("t1", 10_000);
        assert_eq!(body["size"], 10_000);
        assert_eq!(body["query"]["bool"]["filter"][0]["term"]["trace_id"], "t1");
    }
}
