//! Bounded cache of verification outcomes.

use crate::verify_result::VerifyResult;
use lru::LruCache;
use neoxide_core::UInt256;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Cache capacity; the oldest entry is evicted on overflow.
pub const CACHE_CAPACITY: usize = 10_000;
/// Entries expire after this long.
pub const CACHE_TTL: Duration = Duration::from_secs(30 * 60);
/// Entries expire once the chain has advanced this many blocks past the
/// height they were decided at.
pub const CACHE_MAX_HEIGHT_DRIFT: u32 = 100;

/// Which checks a cached outcome covers; results verified with skip flags
/// must not satisfy stricter lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerificationMode {
    /// Signature verification was skipped.
    pub skip_signatures: bool,
    /// Witness-binding verification was skipped.
    pub skip_witnesses: bool,
}

struct CacheEntry {
    result: VerifyResult,
    block_height: u32,
    decided_at: Instant,
}

/// Process-wide verification cache keyed by `(tx hash, mode)`.
pub struct VerificationCache {
    entries: Mutex<LruCache<(UInt256, VerificationMode), CacheEntry>>,
}

impl Default for VerificationCache {
    fn default() -> Self {
        Self::with_capacity(CACHE_CAPACITY)
    }
}

impl VerificationCache {
    /// Creates a cache with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero"),
            )),
        }
    }

    /// Looks up a fresh cached outcome.
    pub fn get(
        &self,
        hash: &UInt256,
        mode: VerificationMode,
        current_height: u32,
    ) -> Option<VerifyResult> {
        let mut entries = self.entries.lock();
        let key = (*hash, mode);
        let entry = entries.get(&key)?;
        let stale = entry.decided_at.elapsed() > CACHE_TTL
            || current_height.saturating_sub(entry.block_height) > CACHE_MAX_HEIGHT_DRIFT;
        if stale {
            entries.pop(&key);
            return None;
        }
        Some(entry.result)
    }

    /// Stores an outcome decided at the given height.
    pub fn put(
        &self,
        hash: UInt256,
        mode: VerificationMode,
        result: VerifyResult,
        block_height: u32,
    ) {
        if !result.is_cacheable() {
            return;
        }
        self.entries.lock().put(
            (hash, mode),
            CacheEntry {
                result,
                block_height,
                decided_at: Instant::now(),
            },
        );
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODE: VerificationMode = VerificationMode {
        skip_signatures: false,
        skip_witnesses: false,
    };

    fn hash(n: u8) -> UInt256 {
        UInt256::from_bytes([n; 32])
    }

    #[test]
    fn test_hit_within_window() {
        let cache = VerificationCache::new();
        cache.put(hash(1), MODE, VerifyResult::Succeed, 100);
        assert_eq!(cache.get(&hash(1), MODE, 150), Some(VerifyResult::Succeed));
        assert_eq!(cache.get(&hash(1), MODE, 200), Some(VerifyResult::Succeed));
    }

    #[test]
    fn test_height_drift_expires() {
        let cache = VerificationCache::new();
        cache.put(hash(1), MODE, VerifyResult::Succeed, 100);
        assert_eq!(cache.get(&hash(1), MODE, 201), None);
        // The stale entry is dropped, not retained.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mode_partitions_entries() {
        let cache = VerificationCache::new();
        let relaxed = VerificationMode {
            skip_signatures: true,
            skip_witnesses: false,
        };
        cache.put(hash(1), relaxed, VerifyResult::Succeed, 100);
        assert_eq!(cache.get(&hash(1), MODE, 100), None);
        assert_eq!(cache.get(&hash(1), relaxed, 100), Some(VerifyResult::Succeed));
    }

    #[test]
    fn test_transient_results_not_cached() {
        let cache = VerificationCache::new();
        cache.put(hash(1), MODE, VerifyResult::UnableToVerify, 100);
        cache.put(hash(2), MODE, VerifyResult::Failed, 100);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = VerificationCache::with_capacity(2);
        cache.put(hash(1), MODE, VerifyResult::Succeed, 1);
        cache.put(hash(2), MODE, VerifyResult::Succeed, 1);
        cache.put(hash(3), MODE, VerifyResult::Succeed, 1);
        assert_eq!(cache.get(&hash(1), MODE, 1), None);
        assert_eq!(cache.get(&hash(3), MODE, 1), Some(VerifyResult::Succeed));
        assert_eq!(cache.len(), 2);
    }
}
