//! Persistent response cache shared by the enrichment and star engines.
//!
//! Values are stored as serialized JSON with a per-entry TTL, so readers
//! decode them into typed structs and can recognise older shapes.

use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AppConfig;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    payload: Arc<str>,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    cache: Cache<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.cache_max_capacity)
    }

    /// Reads and decodes an entry. Entries that no longer decode are
    /// logged and treated as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.cache.get(key).await?;
        match serde_json::from_str(&entry.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring undecodable cache entry");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(payload) => {
                let entry = CacheEntry {
                    payload: payload.into(),
                    ttl,
                };
                self.cache.insert(key.to_string(), entry).await;
            }
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to serialize cache entry");
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Stores a raw JSON payload; used to seed entries written by older
    /// versions of the cache schema.
    pub async fn set_raw(&self, key: &str, payload: &str, ttl: Duration) {
        let entry = CacheEntry {
            payload: payload.into(),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = ResponseCache::new(100);
        let value = Sample {
            name: "widget".to_string(),
            count: 3,
        };

        cache.set("k", &value, Duration::from_secs(60)).await;
        assert_eq!(cache.get::<Sample>("k").await, Some(value));

        cache.delete("k").await;
        assert_eq!(cache.get::<Sample>("k").await, None);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_treated_as_absent() {
        let cache = ResponseCache::new(100);
        cache.set("k", &"not a sample", Duration::from_secs(60)).await;
        assert_eq!(cache.get::<Sample>("k").await, None);
    }

    #[tokio::test]
    async fn test_entries_expire_after_their_ttl() {
        let cache = ResponseCache::new(100);
        cache.set("short", &1u32, Duration::from_millis(50)).await;
        cache.set("long", &2u32, Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.get::<u32>("short").await, None);
        assert_eq!(cache.get::<u32>("long").await, Some(2));
    }
}
