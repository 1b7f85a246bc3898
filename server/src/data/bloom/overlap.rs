use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{BloomFilter, MemoryBloom};

struct Chain {
    front: MemoryBloom,
    after: Option<MemoryBloom>,
}

/// Two staggered filters: adds go to both, lookups read `front`
///
/// Half a period after start an `after` filter begins collecting keys. At
/// every rotation `after` replaces `front`, so each key is remembered for at
/// least half a reset interval.
pub struct OverlapBloom {
    chain: RwLock<Chain>,
    capacity: usize,
    fp_rate: f64,
    reset_interval: Duration,
}

impl OverlapBloom {
    pub fn new(capacity: usize, fp_rate: f64, reset_interval: Duration) -> Self {
        Self {
            chain: RwLock::new(Chain {
                front: MemoryBloom::new(capacity, fp_rate),
                after: None,
            }),
            capacity,
            fp_rate,
            reset_interval,
        }
    }

    /// Start collecting keys into a fresh `after` filter
    pub fn create_overlap(&self) {
        self.chain.write().after = Some(MemoryBloom::new(self.capacity, self.fp_rate));
    }

    /// Promote `after` to `front`; with no `after` the front is cleared
    pub fn rotate(&self) {
        let mut chain = self.chain.write();
        chain.front = chain
            .after
            .take()
            .unwrap_or_else(|| MemoryBloom::new(self.capacity, self.fp_rate));
    }

    /// Drive the create/rotate cycle until shutdown
    pub fn spawn_rotation(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let bloom = Arc::clone(self);
        let half = bloom.reset_interval / 2;
        tokio::spawn(async move {
            let mut overlapping = false;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.wait_for(|&v| v) => {
                        tracing::debug!("Bloom rotation task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(half) => {
                        if overlapping {
                            bloom.rotate();
                            tracing::debug!("Bloom filter rotated");
                        } else {
                            bloom.create_overlap();
                        }
                        overlapping = !overlapping;
                    }
                }
            }
        })
    }
}

impl BloomFilter for OverlapBloom {
    fn add(&self, key: &str) {
        let chain = self.chain.read();
        chain.front.add(key);
        if let Some(after) = &chain.after {
            after.add(key);
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.chain.read().front.contains(key)
    }

    fn name(&self) -> &'static str {
        "overlap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bloom() -> OverlapBloom {
        OverlapBloom::new(1000, 0.01, Duration::from_secs(60))
    }

    #[test]
    fn test_rotate_keeps_keys_added_during_overlap() {
        let bloom = bloom();
        bloom.add("early");
        bloom.create_overlap();
        bloom.add("late");

        bloom.rotate();
        assert!(!bloom.contains("early"));
        assert!(bloom.contains("late"));
    }

    #[test]
    fn test_rotate_without_overlap_clears() {
        let bloom = bloom();
        bloom.add("key");
        bloom.rotate();
        assert!(!bloom.contains("key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_schedule() {
        let bloom = Arc::new(bloom());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = bloom.spawn_rotation(shutdown_rx);

        bloom.add("first");
        // t=30s: overlap created
        tokio::time::sleep(Duration::from_secs(31)).await;
        bloom.add("second");
        assert!(bloom.contains("first"));

        // t=60s: after promoted to front
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!bloom.contains("first"));
        assert!(bloom.contains("second"));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
