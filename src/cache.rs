//! Response body cache.
//!
//! Maps a payload size to an immutable body of exactly that many fill bytes.
//! Each event loop owns its own cache, so lookups take no locks. Entries are
//! built on first use and never evicted: the set of sizes a benchmark asks
//! for is small.

use bytes::Bytes;
use std::collections::{HashMap, TryReserveError};
use tracing::trace;

/// Byte every cached body is filled with.
pub const FILL_BYTE: u8 = b'X';

/// Size-keyed cache of response bodies.
#[derive(Debug, Default)]
pub struct ResponseCache {
    bodies: HashMap<usize, Bytes>,
    hits: u64,
    misses: u64,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Body of `size` bytes, built and inserted on first request.
    ///
    /// The returned `Bytes` shares storage with the cached entry, so every
    /// caller asking for the same size gets the same buffer. Fails only if
    /// a new body cannot be allocated; nothing is cached in that case.
    pub fn get_or_build(&mut self, size: usize) -> Result<Bytes, TryReserveError> {
        if let Some(body) = self.bodies.get(&size) {
            self.hits += 1;
            return Ok(body.clone());
        }

        self.misses += 1;
        let mut fill = Vec::new();
        fill.try_reserve_exact(size)?;
        fill.resize(size, FILL_BYTE);

        let body = Bytes::from(fill);
        trace!(size, "Built response body");
        self.bodies.insert(size, body.clone());
        Ok(body)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.bodies.len(),
            bytes: self.bodies.values().map(Bytes::len).sum(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_exact_size() {
        let mut cache = ResponseCache::new();
        let body = cache.get_or_build(2048).unwrap();

        assert_eq!(body.len(), 2048);
        assert!(body.iter().all(|&b| b == b'X'));
    }

    #[test]
    fn test_reuse_same_buffer() {
        let mut cache = ResponseCache::new();
        let first = cache.get_or_build(100).unwrap();
        let second = cache.get_or_build(100).unwrap();

        assert_eq!(first.as_ptr(), second.as_ptr());
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_one_entry_per_size() {
        let mut cache = ResponseCache::new();
        for size in [0, 1, 1024, 1, 0, 1024] {
            cache.get_or_build(size).unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.bytes, 1025);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.hits, 3);
    }

    #[test]
    fn test_zero_size() {
        let mut cache = ResponseCache::new();
        assert!(cache.get_or_build(0).unwrap().is_empty());
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn test_unallocatable_size_is_not_cached() {
        let mut cache = ResponseCache::new();
        assert!(cache.get_or_build(usize::MAX).is_err());

        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_caches_are_isolated() {
        let mut a = ResponseCache::new();
        let b = ResponseCache::new();
        a.get_or_build(10).unwrap();

        assert_eq!(a.stats().entries, 1);
        assert_eq!(b.stats().entries, 0);
    }
}
