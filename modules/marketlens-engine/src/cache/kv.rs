//! L2 capability seam.
//!
//! The distributed KV tier is optional. Callers always talk to a `KvLayer`;
//! when no backing store is configured the `DisabledKv` no-op is selected at
//! init, so nothing above this module branches on availability.

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait KvLayer: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: &Value, ttl_s: u64);
    async fn delete(&self, key: &str);
    async fn delete_prefix(&self, prefix: &str);
    async fn clear(&self);
    fn enabled(&self) -> bool;
}

/// Selected when `CACHE_L2_ENABLED` is off or no URL is configured.
pub struct DisabledKv;

#[async_trait]
impl KvLayer for DisabledKv {
    async fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    async fn set(&self, _key: &str, _value: &Value, _ttl_s: u64) {}

    async fn delete(&self, _key: &str) {}

    async fn delete_prefix(&self, _prefix: &str) {}

    async fn clear(&self) {}

    fn enabled(&self) -> bool {
        false
    }
}
