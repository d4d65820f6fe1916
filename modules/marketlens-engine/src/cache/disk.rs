//! L3: local disk KV with a JSON index and size-bound LRU eviction.
//!
//! Values are JSON files named by key hash in 2-hex-prefix shards. The
//! index tracks TTL and last access; eviction drops the least recently
//! used files first. All I/O failures degrade to cache misses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
struct IndexEntry {
    inserted_at_s: u64,
    ttl_s: u64,
    size_bytes: u64,
    last_access_s: u64,
}

pub struct DiskCache {
    dir: PathBuf,
    max_bytes: u64,
    index: HashMap<String, IndexEntry>,
}

fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl DiskCache {
    pub fn open(dir: &Path, max_gb: f64) -> Self {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "failed to create disk cache dir");
        }
        let index = Self::load_index(dir);
        Self {
            dir: dir.to_path_buf(),
            max_bytes: (max_gb * 1024.0 * 1024.0 * 1024.0) as u64,
            index,
        }
    }

    fn index_path(dir: &Path) -> PathBuf {
        dir.join("index.json")
    }

    fn load_index(dir: &Path) -> HashMap<String, IndexEntry> {
        match std::fs::read_to_string(Self::index_path(dir)) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    fn save_index(&self) {
        let raw = match serde_json::to_string(&self.index) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to serialize disk cache index");
                return;
            }
        };
        if let Err(e) = std::fs::write(Self::index_path(&self.dir), raw) {
            warn!(error = %e, "failed to write disk cache index");
        }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(&hex[..2]).join(format!("{hex}.json"))
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        let entry = self.index.get(key)?.clone();
        if now_s().saturating_sub(entry.inserted_at_s) > entry.ttl_s {
            self.remove(key);
            return None;
        }

        let path = self.file_path(key);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                self.index.remove(key);
                return None;
            }
        };
        let value: Value = serde_json::from_str(&raw).ok()?;

        if let Some(e) = self.index.get_mut(key) {
            e.last_access_s = now_s();
        }
        self.save_index();
        Some(value)
    }

    pub fn set(&mut self, key: &str, value: &Value, ttl_s: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to serialize disk cache value");
                return;
            }
        };
        let size_bytes = raw.len() as u64;

        // Evict least recently used entries until the new value fits.
        let mut total: u64 = self.index.values().map(|e| e.size_bytes).sum();
        while total + size_bytes > self.max_bytes && !self.index.is_empty() {
            let lru_key = self
                .index
                .iter()
                .min_by_key(|(_, e)| e.last_access_s)
                .map(|(k, _)| k.clone());
            match lru_key {
                Some(k) => {
                    self.remove(&k);
                    total = self.index.values().map(|e| e.size_bytes).sum();
                }
                None => break,
            }
        }

        let path = self.file_path(key);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, raw) {
            warn!(error = %e, "failed to write disk cache value");
            return;
        }

        let now = now_s();
        self.index.insert(
            key.to_string(),
            IndexEntry {
                inserted_at_s: now,
                ttl_s,
                size_bytes,
                last_access_s: now,
            },
        );
        self.save_index();
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if self.index.remove(key).is_none() {
            return false;
        }
        let _ = std::fs::remove_file(self.file_path(key));
        self.save_index();
        true
    }

    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .index
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn clear(&mut self) {
        let keys: Vec<String> = self.index.keys().cloned().collect();
        for key in keys {
            self.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "marketlens-disk-cache-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn roundtrip() {
        let dir = temp_dir("roundtrip");
        let mut cache = DiskCache::open(&dir, 1.0);
        cache.set("k", &json!({"a": 1}), 3600);
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn expired_entry_is_removed() {
        let dir = temp_dir("expired");
        let mut cache = DiskCache::open(&dir, 1.0);
        cache.set("k", &json!(1), 0);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn survives_reopen() {
        let dir = temp_dir("reopen");
        {
            let mut cache = DiskCache::open(&dir, 1.0);
            cache.set("persist", &json!("value"), 3600);
        }
        let mut cache = DiskCache::open(&dir, 1.0);
        assert_eq!(cache.get("persist"), Some(json!("value")));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn size_bound_evicts_lru() {
        let dir = temp_dir("evict");
        // ~0.00003 GB = ~322 bytes budget
        let mut cache = DiskCache::open(&dir, 0.0000003);
        let blob: String = "x".repeat(120);
        cache.set("old", &json!(blob.clone()), 3600);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        cache.set("mid", &json!(blob.clone()), 3600);
        cache.set("new", &json!(blob), 3600);
        assert!(cache.get("old").is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn remove_prefix_works() {
        let dir = temp_dir("prefix");
        let mut cache = DiskCache::open(&dir, 1.0);
        cache.set("report:a", &json!(1), 3600);
        cache.set("report:b", &json!(2), 3600);
        cache.set("plan:c", &json!(3), 3600);
        assert_eq!(cache.remove_prefix("report:"), 2);
        assert_eq!(cache.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
