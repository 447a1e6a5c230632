//! Exact-tier key-value store.
//!
//! [`KeyValueStore`] is the seam for external stores (Redis, memcached);
//! [`MemoryKvStore`] is the in-process default, a TTL-aware [`DashMap`]
//! with policy-driven eviction. Expiry is lazy: expired entries are
//! dropped when read, or swept by eviction when capacity forces it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::debug;

use crate::cache::eviction::{self, EntryMeta};
use crate::cache::{CachedResponse, TierStats};
use crate::config::EvictionPolicy;
use crate::PipelineError;

/// Storage seam for the exact cache tier.
///
/// Implementations must be thread-safe (Send + Sync). The trait is
/// object-safe so stores can be swapped behind `Arc<dyn KeyValueStore>`.
///
/// # Errors
///
/// Methods return [`PipelineError::CacheUnavailable`] when the backing
/// store cannot be reached; the chain absorbs this and skips the tier.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the entry for `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, PipelineError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(
        &self,
        key: &str,
        value: CachedResponse,
        ttl: Duration,
    ) -> Result<(), PipelineError>;

    /// Remove `key`, reporting whether an entry existed.
    async fn delete(&self, key: &str) -> Result<bool, PipelineError>;

    /// Drop every entry.
    async fn clear(&self) -> Result<(), PipelineError>;

    /// Point-in-time counters for observability.
    fn stats(&self) -> TierStats;
}

struct StoredEntry {
    value: CachedResponse,
    created_at: SystemTime,
    last_accessed: SystemTime,
    expires_at: SystemTime,
    access_count: u64,
}

/// In-memory exact tier.
///
/// # Panics
///
/// This type never panics.
pub struct MemoryKvStore {
    entries: DashMap<String, StoredEntry>,
    max_entries: usize,
    policy: EvictionPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryKvStore {
    /// Create a store holding at most `max_entries`, evicting by `policy`.
    pub fn new(max_entries: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of live entries (including any not yet swept).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_one(&self, now: SystemTime) {
        // Snapshot metadata first so no shard lock is held during removal.
        let metas: Vec<EntryMeta> = self
            .entries
            .iter()
            .map(|e| EntryMeta {
                key: e.key().clone(),
                created_at: e.created_at,
                last_accessed: e.last_accessed,
                expires_at: e.expires_at,
                access_count: e.access_count,
                saved_tokens: e.value.usage.total(),
            })
            .collect();
        if let Some(victim) = eviction::select_victim(self.policy, now, &metas) {
            if self.entries.remove(&victim).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = victim.as_str(), policy = ?self.policy, "evicted cache entry");
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, PipelineError> {
        let now = SystemTime::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.expires_at > now {
                entry.access_count += 1;
                entry.last_accessed = now;
                let value = entry.value.clone();
                drop(entry);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(value));
            }
            // Expired: release the guard before removing from the shard.
            drop(entry);
            self.entries.remove(key);
            debug!(key = key, "cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: CachedResponse,
        ttl: Duration,
    ) -> Result<(), PipelineError> {
        let now = SystemTime::now();
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            self.evict_one(now);
        }
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                created_at: now,
                last_accessed: now,
                expires_at: now + ttl,
                access_count: 0,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, PipelineError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        self.entries.clear();
        Ok(())
    }

    fn stats(&self) -> TierStats {
        TierStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenUsage;

    fn response(text: &str) -> CachedResponse {
        CachedResponse::new(text, "test-model", TokenUsage::new(10, 20))
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let store = MemoryKvStore::new(16, EvictionPolicy::Lru);
        store.set("k1", response("cached"), TTL).await.unwrap();
        let got = store.get("k1").await.unwrap().unwrap();
        assert_eq!(got.text, "cached");
        assert_eq!(got.usage.total(), 30);
    }

    #[tokio::test]
    async fn test_get_missing_key_returns_none() {
        let store = MemoryKvStore::new(16, EvictionPolicy::Lru);
        assert!(store.get("absent").await.unwrap().is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped_on_read() {
        let store = MemoryKvStore::new(16, EvictionPolicy::Lru);
        store
            .set("short", response("gone soon"), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.is_empty(), "expired entry should be removed");
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let store = MemoryKvStore::new(2, EvictionPolicy::Lru);
        store.set("a", response("1"), TTL).await.unwrap();
        store.set("b", response("2"), TTL).await.unwrap();
        store.set("a", response("3"), TTL).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().evictions, 0);
        assert_eq!(store.get("a").await.unwrap().unwrap().text, "3");
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let store = MemoryKvStore::new(2, EvictionPolicy::Lru);
        store.set("old", response("o"), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set("kept", response("k"), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Touch "old" so "kept" becomes the LRU victim.
        let _ = store.get("old").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        store.set("new", response("n"), TTL).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("kept").await.unwrap().is_none());
        assert!(store.get("old").await.unwrap().is_some());
        assert!(store.get("new").await.unwrap().is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_frequently_used() {
        let store = MemoryKvStore::new(2, EvictionPolicy::Lfu);
        store.set("popular", response("p"), TTL).await.unwrap();
        store.set("unpopular", response("u"), TTL).await.unwrap();
        for _ in 0..3 {
            let _ = store.get("popular").await.unwrap();
        }
        store.set("new", response("n"), TTL).await.unwrap();
        assert!(store.get("unpopular").await.unwrap().is_none());
        assert!(store.get("popular").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = MemoryKvStore::new(16, EvictionPolicy::Lru);
        store.set("k", response("v"), TTL).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_empties_store() {
        let store = MemoryKvStore::new(16, EvictionPolicy::Lru);
        store.set("a", response("1"), TTL).await.unwrap();
        store.set("b", response("2"), TTL).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let store = MemoryKvStore::new(16, EvictionPolicy::Lru);
        store.set("k", response("v"), TTL).await.unwrap();
        let _ = store.get("k").await.unwrap();
        let _ = store.get("k").await.unwrap();
        let _ = store.get("nope").await.unwrap();
        let stats = store.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_concurrent_readers_and_writers() {
        use std::sync::Arc;
        let store = Arc::new(MemoryKvStore::new(64, EvictionPolicy::Lru));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = format!("key-{}", i % 4);
                store.set(&key, response("shared"), TTL).await.unwrap();
                let _ = store.get(&key).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(store.len() <= 4);
    }
}
