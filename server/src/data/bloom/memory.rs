use std::f64::consts::LN_2;
use std::sync::atomic::{AtomicU64, Ordering};

use twox_hash::XxHash64;

use super::BloomFilter;

const SEED_PRIMARY: u64 = 0;
const SEED_SECONDARY: u64 = 0x9e37_79b9_7f4a_7c15;

/// Lock-free bitset bloom filter
///
/// Bit positions use double hashing: `h1 + i * h2` for `i` in `0..k`.
pub struct MemoryBloom {
    bits: Vec<AtomicU64>,
    num_bits: u64,
    num_hashes: u32,
}

impl MemoryBloom {
    /// Size the filter for `capacity` keys at false positive rate `fp_rate`
    pub fn new(capacity: usize, fp_rate: f64) -> Self {
        let (num_bits, num_hashes) = optimal_params(capacity, fp_rate);
        let words = num_bits.div_ceil(64) as usize;
        Self {
            bits: (0..words).map(|_| AtomicU64::new(0)).collect(),
            num_bits,
            num_hashes,
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn positions(&self, key: &str) -> impl Iterator<Item = u64> + use<> {
        let h1 = XxHash64::oneshot(SEED_PRIMARY, key.as_bytes());
        // Odd step so every probe differs
        let h2 = XxHash64::oneshot(SEED_SECONDARY, key.as_bytes()) | 1;
        let num_bits = self.num_bits;
        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }
}

/// m = -n ln p / (ln 2)^2, k = m / n ln 2
fn optimal_params(capacity: usize, fp_rate: f64) -> (u64, u32) {
    let n = capacity.max(1) as f64;
    let p = fp_rate.clamp(f64::MIN_POSITIVE, 0.5);
    let m = (-n * p.ln() / (LN_2 * LN_2)).ceil().max(64.0);
    let k = ((m / n) * LN_2).round().clamp(1.0, 30.0);
    (m as u64, k as u32)
}

impl BloomFilter for MemoryBloom {
    fn add(&self, key: &str) {
        for pos in self.positions(key) {
            let word = (pos / 64) as usize;
            self.bits[word].fetch_or(1 << (pos % 64), Ordering::Relaxed);
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.positions(key).all(|pos| {
            let word = (pos / 64) as usize;
            self.bits[word].load(Ordering::Relaxed) & (1 << (pos % 64)) != 0
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimal_params() {
        let (bits, hashes) = optimal_params(1_000_000, 0.01);
        // ~9.59 bits per key, 7 hashes
        assert!((9_500_000..9_700_000).contains(&bits));
        assert_eq!(hashes, 7);
    }

    #[test]
    fn test_added_keys_are_found() {
        let bloom = MemoryBloom::new(1000, 0.01);
        for i in 0..1000 {
            bloom.add(&format!("app-1-trace-{i}"));
        }
        for i in 0..1000 {
            assert!(bloom.contains(&format!("app-1-trace-{i}")));
        }
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let bloom = MemoryBloom::new(1000, 0.01);
        for i in 0..1000 {
            bloom.add(&format!("present-{i}"));
        }
        let false_positives = (0..10_000)
            .filter(|i| bloom.contains(&format!("absent-{i}")))
            .count();
        // Expected ~100; allow generous slack
        assert!(false_positives < 300, "fp count {false_positives}");
    }

    #[test]
    fn test_empty_filter_contains_nothing() {
        let bloom = MemoryBloom::new(10, 0.01);
        assert!(!bloom.contains("anything"));
        assert!(bloom.num_bits() >= 64);
        assert!(bloom.num_hashes() >= 1);
    }
}
