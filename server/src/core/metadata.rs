//! Per data id metadata lookup
//!
//! The pipeline asks a [`MetadataProvider`] for the tenant/application
//! identity and index names of each data id at startup. The static provider
//! serves them from the `data_sources` config section.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

use super::config::DataSourceConfig;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Unknown data id: {0}")]
    NotFound(String),

    #[error("Invalid metadata for data id {data_id}: {message}")]
    Invalid { data_id: String, message: String },
}

/// Tenant and application identity stamped on every result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseInfo {
    pub bk_tenant_id: String,
    pub biz_id: String,
    pub biz_name: String,
    pub app_id: String,
    pub app_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceMetadata {
    pub data_id: String,
    pub base_info: BaseInfo,
    /// Base name of the result index
    pub result_index: String,
    /// Base name of the span index used by replay
    pub trace_index: String,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn lookup(&self, data_id: &str) -> Result<DataSourceMetadata, MetadataError>;

    /// Every data id this provider knows, in configuration order
    fn data_ids(&self) -> Vec<String>;
}

/// Serves metadata from configuration
pub struct StaticMetadataProvider {
    order: Vec<String>,
    sources: FxHashMap<String, DataSourceMetadata>,
}

impl StaticMetadataProvider {
    pub fn new(sources: &[DataSourceConfig]) -> Self {
        let mut order = Vec::with_capacity(sources.len());
        let mut map = FxHashMap::default();
        for source in sources {
            order.push(source.data_id.clone());
            map.insert(
                source.data_id.clone(),
                DataSourceMetadata {
                    data_id: source.data_id.clone(),
                    base_info: BaseInfo {
                        bk_tenant_id: source.bk_tenant_id.clone(),
                        biz_id: source.biz_id.clone(),
                        biz_name: source.biz_name.clone(),
                        app_id: source.app_id.clone(),
                        app_name: source.app_name.clone(),
                    },
                    result_index: source.index_name.clone(),
                    trace_index: source.trace_index(),
                },
            );
        }
        Self {
            order,
            sources: map,
        }
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadataProvider {
    async fn lookup(&self, data_id: &str) -> Result<DataSourceMetadata, MetadataError> {
        let metadata = self
            .sources
            .get(data_id)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(data_id.to_string()))?;

        if metadata.base_info.app_id.is_empty() || metadata.result_index.is_empty() {
            return Err(MetadataError::Invalid {
                data_id: data_id.to_string(),
                message: "app_id and index_name are required".to_string(),
            });
        }
        Ok(metadata)
    }

    fn data_ids(&self) -> Vec<String> {
        self.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(data_id: &str, app_id: &str) -> DataSourceConfig {
        DataSourceConfig {
            data_id: data_id.to_string(),
            bk_tenant_id: "system".to_string(),
            biz_id: "2".to_string(),
            biz_name: "demo".to_string(),
            app_id: app_id.to_string(),
            app_name: "shop".to_string(),
            index_name: "2_bkapm_precalculate_shop".to_string(),
            trace_index_name: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_known_data_id() {
        let provider = StaticMetadataProvider::new(&[source("1001", "7")]);
        let metadata = provider.lookup("1001").await.unwrap();
        assert_eq!(metadata.base_info.app_id, "7");
        assert_eq!(metadata.base_info.bk_tenant_id, "system");
        assert_eq!(metadata.trace_index, "2_bkapm_trace_shop");
        assert_eq!(metadata.result_index, "2_bkapm_precalculate_shop");
    }

    #[tokio::test]
    async fn test_lookup_unknown_data_id() {
        let provider = StaticMetadataProvider::new(&[]);
        let err = provider.lookup("42").await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(ref id) if id == "42"));
    }

    #[tokio::test]
    async fn test_lookup_rejects_incomplete_source() {
        let provider = StaticMetadataProvider::new(&[source("1001", "")]);
        let err = provider.lookup("1001").await.unwrap_err();
        assert!(matches!(err, MetadataError::Invalid { .. }));
    }

    #[test]
    fn test_data_ids_keep_order() {
        let provider =
            StaticMetadataProvider::new(&[source("b", "1"), source("a", "1"), source("c", "1")]);
        assert_eq!(provider.data_ids(), vec!["b", "a", "c"]);
    }
}
