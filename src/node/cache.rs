/// Generic TTL-keyed cache for node responses: a single `(endpoint,
/// key)` JSON cache covering `info`, `blocks_at_{height}`, `block_{id}`
/// and similar lookups.
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CachedEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct NodeCache {
    entries: RwLock<LruCache<String, CachedEntry>>,
    ttl: Duration,
}

impl NodeCache {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut cache = self.entries.write().await;
        let expired = match cache.get(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return serde_json::from_value(entry.value.clone()).ok(),
            None => return None,
        };
        if expired {
            cache.pop(key);
        }
        None
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        if let Ok(json) = serde_json::to_value(value) {
            let mut cache = self.entries.write().await;
            cache.put(
                key.to_string(),
                CachedEntry {
                    value: json,
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }

    pub async fn invalidate(&self, key: &str) {
        let mut cache = self.entries.write().await;
        cache.pop(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: i64,
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let cache = NodeCache::new(10, 600);
        cache.put("info", &Sample { value: 42 }).await;
        let out: Option<Sample> = cache.get("info").await;
        assert_eq!(out, Some(Sample { value: 42 }));
    }

    #[tokio::test]
    async fn expired_entry_returns_none() {
        let cache = NodeCache::new(10, 0);
        cache.put("info", &Sample { value: 1 }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let out: Option<Sample> = cache.get("info").await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = NodeCache::new(10, 600);
        cache.put("info", &Sample { value: 1 }).await;
        cache.invalidate("info").await;
        let out: Option<Sample> = cache.get("info").await;
        assert_eq!(out, None);
    }
}
