//! Bloom filters for trace dedup
//!
//! A finalized trace adds its dedup key (`{app_id}{trace_id prefix}`); a key
//! that tests positive later makes the processor replay earlier spans.
//!
//! - `MemoryBloom`: fixed-size bitset sized from capacity and fp rate
//! - `OverlapBloom`: two staggered filters rotated on a reset interval so the
//!   filter never grows past capacity and never forgets a fresh key

mod memory;
mod overlap;

pub use memory::MemoryBloom;
pub use overlap::OverlapBloom;

/// Probabilistic set membership
///
/// `contains` may return false positives, never false negatives for keys
/// added since the last rotation of the backing filter.
pub trait BloomFilter: Send + Sync {
    fn add(&self, key: &str);

    fn contains(&self, key: &str) -> bool;

    fn name(&self) -> &'static str;
}
