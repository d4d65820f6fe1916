//! L1: in-process LRU with per-entry TTL and an approximate memory bound.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::Value;

pub struct CacheEntry {
    pub value: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub hits: u64,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

pub struct MemoryCache {
    entries: LruCache<String, CacheEntry>,
    max_bytes: usize,
    current_bytes: usize,
    pub evictions: u64,
}

impl MemoryCache {
    pub fn new(max_items: usize, max_mb: usize) -> Self {
        let capacity = NonZeroUsize::new(max_items.max(1)).unwrap();
        Self {
            entries: LruCache::new(capacity),
            max_bytes: max_mb * 1024 * 1024,
            current_bytes: 0,
            evictions: 0,
        }
    }

    /// Get a value; refreshes LRU recency and bumps the hit counter.
    /// Expired entries are removed and report as misses.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let expired = self
            .entries
            .peek(key)
            .map(|e| e.is_expired())
            .unwrap_or(false);
        if expired {
            if let Some(entry) = self.entries.pop(key) {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            }
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.hits += 1;
        Some(entry.value.clone())
    }

    pub fn set(&mut self, key: String, value: Value, ttl: Duration) {
        let size_bytes = estimate_size(&value);

        // Evict LRU entries until both bounds hold.
        while self.current_bytes + size_bytes > self.max_bytes && !self.entries.is_empty() {
            if let Some((_, evicted)) = self.entries.pop_lru() {
                self.current_bytes = self.current_bytes.saturating_sub(evicted.size_bytes);
                self.evictions += 1;
            }
        }

        if let Some(old) = self.entries.push(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
                hits: 0,
                size_bytes,
            },
        ) {
            // push returns the displaced LRU entry when at capacity
            self.current_bytes = self.current_bytes.saturating_sub(old.1.size_bytes);
            self.evictions += 1;
        }
        self.current_bytes += size_bytes;
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if let Some(entry) = self.entries.pop(key) {
            self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            true
        } else {
            false
        }
    }

    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Unexpired entries with their remaining TTL, for shutdown flushing.
    pub fn live_entries(&self) -> Vec<(String, Value, Duration)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .map(|(k, e)| {
                let remaining = e.ttl.saturating_sub(e.inserted_at.elapsed());
                (k.clone(), e.value.clone(), remaining)
            })
            .collect()
    }
}

fn estimate_size(value: &Value) -> usize {
    // Serialized length is a good-enough proxy for the memory bound.
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(64)
}
