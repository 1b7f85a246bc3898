//! Resolution of the span index queried by replay
//!
//! Span indices roll over as `{prefix}_bkapm_trace_{app}_{YYYYMMDD}_{n}`.
//! Replay only queries the newest one. The name is refreshed from the
//! store's index listing at most once per refresh interval; until a listing
//! succeeds with a match, `{base}*` is used.

use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::time::Instant;

use crate::core::constants::INDEX_REFRESH_INTERVAL_SECS;
use crate::data::storage::StorageProxy;
use crate::utils::time::parse_index_date;

struct Resolved {
    name: String,
    refreshed_at: Option<Instant>,
}

static RE_TRACE_INDEX: OnceLock<Regex> = OnceLock::new();

pub struct IndexResolver {
    base_index: String,
    app_name: String,
    refresh_interval: Duration,
    state: Mutex<Resolved>,
}

impl IndexResolver {
    pub fn new(base_index: &str, app_name: &str) -> Self {
        Self::with_refresh_interval(
            base_index,
            app_name,
            Duration::from_secs(INDEX_REFRESH_INTERVAL_SECS),
        )
    }

    pub fn with_refresh_interval(
        base_index: &str,
        app_name: &str,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            base_index: base_index.to_string(),
            app_name: app_name.to_string(),
            refresh_interval,
            state: Mutex::new(Resolved {
                name: format!("{}*", base_index),
                refreshed_at: None,
            }),
        }
    }

    /// Index name to query, refreshing it from the store when stale
    pub async fn resolve(&self, proxy: &StorageProxy) -> String {
        let now = Instant::now();
        {
            let state = self.state.lock();
            if state
                .refreshed_at
                .is_some_and(|at| now.duration_since(at) < self.refresh_interval)
            {
                return state.name.clone();
            }
        }

        let listed = proxy.list_indices(&format!("{}_*", self.base_index)).await;
        let mut state = self.state.lock();
        state.refreshed_at = Some(now);
        match listed {
            Ok(names) => match newest_trace_index(&self.app_name, &names) {
                Some(newest) => {
                    tracing::debug!(index = %newest, "Resolved newest span index");
                    state.name = newest;
                }
                None => {
                    tracing::debug!(
                        base = %self.base_index,
                        "No dated span index found, using wildcard"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(base = %self.base_index, error = %e, "Failed to list span indices");
            }
        }
        state.name.clone()
    }
}

/// Newest `.*_bkapm_trace_{app}_{YYYYMMDD}_{n}` index by its date part
pub fn newest_trace_index(app_name: &str, names: &[String]) -> Option<String> {
    let re = RE_TRACE_INDEX
        .get_or_init(|| Regex::new(r"_bkapm_trace_(.+)_(\d{8})_\d+$").expect("Invalid regex"));
    names
        .iter()
        .filter_map(|name| {
            let caps = re.captures(name)?;
            if &caps[1] != app_name {
                return None;
            }
            Some((parse_index_date(&caps[2])?, name))
        })
        .max()
        .map(|(_, name)| name.clone())
}
