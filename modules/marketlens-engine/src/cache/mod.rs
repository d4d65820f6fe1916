//! Multi-level cache: L1 in-process LRU, optional L2 distributed KV,
//! optional L3 disk. Reads check L1→L2→L3 and promote hits upward;
//! writes fan out to the requested layers.

pub mod disk;
pub mod key;
pub mod kv;
pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use disk::DiskCache;
use kv::{DisabledKv, KvLayer};
use memory::MemoryCache;

pub use key::{fingerprint, hour_bucket, normalize_query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayer {
    L1,
    L2,
    L3,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub l1_hits: AtomicU64,
    pub l2_hits: AtomicU64,
    pub l3_hits: AtomicU64,
    pub promotions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub struct CacheConfig {
    pub l1_max_items: usize,
    pub l1_max_mb: usize,
    pub l1_default_ttl: Duration,
    pub l2_default_ttl: Duration,
    pub l3_default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_items: 512,
            l1_max_mb: 100,
            l1_default_ttl: Duration::from_secs(600),
            l2_default_ttl: Duration::from_secs(3600),
            l3_default_ttl: Duration::from_secs(86_400),
        }
    }
}

pub struct MultiLevelCache {
    l1: Mutex<MemoryCache>,
    l2: Box<dyn KvLayer>,
    l3: Option<Mutex<DiskCache>>,
    config: CacheConfig,
    pub stats: CacheStats,
}

impl MultiLevelCache {
    pub fn new(config: CacheConfig, l2: Box<dyn KvLayer>, l3: Option<DiskCache>) -> Self {
        Self {
            l1: Mutex::new(MemoryCache::new(config.l1_max_items, config.l1_max_mb)),
            l2,
            l3: l3.map(Mutex::new),
            config,
            stats: CacheStats::default(),
        }
    }

    /// L1-only cache with defaults, used when no optional tiers are configured.
    pub fn memory_only(l1_max_items: usize, l1_max_mb: usize, l1_default_ttl: Duration) -> Self {
        Self::new(
            CacheConfig {
                l1_max_items,
                l1_max_mb,
                l1_default_ttl,
                ..CacheConfig::default()
            },
            Box::new(DisabledKv),
            None,
        )
    }

    /// Read through the hierarchy. A hit at a lower layer is promoted to
    /// every faster layer (at most once per read).
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.l1.lock().await.get(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        if let Some(value) = self.l2.get(key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
            self.stats.promotions.fetch_add(1, Ordering::Relaxed);
            self.l1
                .lock()
                .await
                .set(key.to_string(), value.clone(), self.config.l1_default_ttl);
            debug!(key, "cache hit at L2, promoted to L1");
            return Some(value);
        }

        if let Some(l3) = &self.l3 {
            if let Some(value) = l3.lock().await.get(key) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.stats.l3_hits.fetch_add(1, Ordering::Relaxed);
                self.stats.promotions.fetch_add(1, Ordering::Relaxed);
                if self.l2.enabled() {
                    self.l2
                        .set(key, &value, self.config.l2_default_ttl.as_secs())
                        .await;
                }
                self.l1
                    .lock()
                    .await
                    .set(key.to_string(), value.clone(), self.config.l1_default_ttl);
                debug!(key, "cache hit at L3, promoted upward");
                return Some(value);
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write to the given layers (all configured layers when `layers` is None).
    /// `ttl` of None uses each layer's default.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        layers: Option<&[CacheLayer]>,
    ) {
        let all = [CacheLayer::L1, CacheLayer::L2, CacheLayer::L3];
        let layers = layers.unwrap_or(&all);

        if layers.contains(&CacheLayer::L1) {
            self.l1.lock().await.set(
                key.to_string(),
                value.clone(),
                ttl.unwrap_or(self.config.l1_default_ttl),
            );
        }
        if layers.contains(&CacheLayer::L2) && self.l2.enabled() {
            let ttl_s = ttl.unwrap_or(self.config.l2_default_ttl).as_secs();
            self.l2.set(key, &value, ttl_s).await;
        }
        if layers.contains(&CacheLayer::L3) {
            if let Some(l3) = &self.l3 {
                let ttl_s = ttl.unwrap_or(self.config.l3_default_ttl).as_secs();
                l3.lock().await.set(key, &value, ttl_s);
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.l1.lock().await.remove(key);
        self.l2.delete(key).await;
        if let Some(l3) = &self.l3 {
            l3.lock().await.remove(key);
        }
    }

    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.l1.lock().await.remove_prefix(prefix);
        self.l2.delete_prefix(prefix).await;
        if let Some(l3) = &self.l3 {
            l3.lock().await.remove_prefix(prefix);
        }
    }

    pub async fn clear(&self) {
        self.l1.lock().await.clear();
        self.l2.clear().await;
        if let Some(l3) = &self.l3 {
            l3.lock().await.clear();
        }
    }

    /// Persist live L1 entries into L3 so they survive a restart. No-op
    /// when the disk tier is not configured.
    pub async fn flush_to_disk(&self) -> usize {
        let Some(l3) = &self.l3 else {
            return 0;
        };
        let entries = self.l1.lock().await.live_entries();
        let mut l3 = l3.lock().await;
        let mut written = 0;
        for (key, value, remaining) in entries {
            if remaining.as_secs() > 0 {
                l3.set(&key, &value, remaining.as_secs());
                written += 1;
            }
        }
        written
    }
}
