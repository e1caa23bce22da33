//! Discovery document cache.
//!
//! An LRU + TTL, mutex-protected cache keyed by `(path, namespace)` storing
//! opaque JSON bodies, scoped to discovery and capabilities responses
//! (`GET /api/plugins`, `GET /api/plugins/{name}/capabilities`).

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::Value;

#[derive(Clone)]
struct CachedEntry {
    body: Value,
    created_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Cache key: request path plus resolved tenant namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryCacheKey {
    pub path: String,
    pub namespace: String,
}

pub struct DiscoveryCache {
    entries: Mutex<LruCache<DiscoveryCacheKey, CachedEntry>>,
}

impl DiscoveryCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_size.max(1)).unwrap(),
            )),
        }
    }

    pub fn get(&self, key: &DiscoveryCacheKey) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired() {
                return Some(entry.body.clone());
            }
            entries.pop(key);
        }
        None
    }

    pub fn set(&self, key: DiscoveryCacheKey, body: Value, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.put(
            key,
            CachedEntry {
                body,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Invalidated wholesale on plugin re-init, source mutation, or
    /// capabilities change; the cache is small enough that a full clear is
    /// cheaper than tracking per-plugin dependency sets.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_expire() {
        let cache = DiscoveryCache::new(10);
        let key = DiscoveryCacheKey {
            path: "/api/plugins".into(),
            namespace: "default".into(),
        };
        cache.set(key.clone(), serde_json::json!({"ok": true}), Duration::from_millis(20));
        assert!(cache.get(&key).is_some());
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn clear_invalidates_everything() {
        let cache = DiscoveryCache::new(10);
        let key = DiscoveryCacheKey {
            path: "/api/plugins".into(),
            namespace: "default".into(),
        };
        cache.set(key.clone(), serde_json::json!([]), Duration::from_secs(60));
        cache.clear();
        assert!(cache.get(&key).is_none());
    }
}
