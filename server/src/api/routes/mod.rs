//! API route handlers

pub mod health;
pub mod spans;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::domain::RunInstance;

/// Running data sources by data id
#[derive(Clone, Default)]
pub struct IngestState {
    pub instances: Arc<FxHashMap<String, Arc<RunInstance>>>,
}

impl IngestState {
    pub fn new(instances: impl IntoIterator<Item = Arc<RunInstance>>) -> Self {
        let instances = instances
            .into_iter()
            .map(|instance| (instance.data_id().to_string(), instance))
            .collect();
        Self {
            instances: Arc::new(instances),
        }
    }
}
