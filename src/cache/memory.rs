//! In-process cache backend.
//!
//! An LRU map with a deadline per entry. Expired entries are treated as absent
//! and dropped when touched; capacity pressure evicts least-recently-used
//! entries first.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;

use super::config::CacheConfig;
use super::store::{BackendError, CacheBackend};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::memory";

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct MemoryBackend {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryBackend {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    /// Number of stored entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains")
            .peek(key)
            .is_some_and(|entry| entry.is_live(Instant::now()))
    }

    /// Overwrite an entry's bytes in place, keeping its deadline.
    pub fn corrupt(&self, key: &str, value: Bytes) -> bool {
        match rw_write(&self.entries, SOURCE, "corrupt").peek_mut(key) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }
}

/// Deadline used when `now + ttl` does not fit in an `Instant`.
fn far_future(now: Instant) -> Instant {
    now.checked_add(FAR_FUTURE).unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        let now = Instant::now();
        let entry = Entry {
            value,
            expires_at: now.checked_add(ttl).unwrap_or_else(|| far_future(now)),
        };
        let evicted = rw_write(&self.entries, SOURCE, "set_ex").push(key.to_string(), entry);
        if matches!(evicted, Some((ref evicted_key, _)) if evicted_key != key) {
            counter!("pressroom_cache_memory_evict_total").increment(1);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, BackendError> {
        let removed = rw_write(&self.entries, SOURCE, "delete").pop(key);
        Ok(u64::from(removed.is_some()))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(capacity: usize) -> MemoryBackend {
        MemoryBackend::new(&CacheConfig {
            memory_capacity: capacity,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn set_then_get() {
        let cache = backend(8);
        cache
            .set_ex("a", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await
            .expect("set");
        assert_eq!(
            cache.get("a").await.expect("get"),
            Some(Bytes::from_static(b"1"))
        );
        assert_eq!(cache.get("b").await.expect("get"), None);
    }

    #[tokio::test]
    async fn expired_entries_are_absent_and_dropped() {
        let cache = backend(8);
        cache
            .set_ex("a", Bytes::from_static(b"1"), Duration::from_millis(10))
            .await
            .expect("set");
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!cache.contains("a"));
        assert_eq!(cache.get("a").await.expect("get"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_matching_keys() {
        let cache = backend(8);
        for key in ["ns:list:1", "ns:list:2", "ns:detail:1"] {
            cache
                .set_ex(key, Bytes::from_static(b"x"), Duration::from_secs(60))
                .await
                .expect("set");
        }

        assert_eq!(cache.delete_prefix("ns:list:").await.expect("delete"), 2);
        assert!(cache.contains("ns:detail:1"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn delete_reports_removed_count() {
        let cache = backend(8);
        cache
            .set_ex("a", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await
            .expect("set");
        assert_eq!(cache.delete("a").await.expect("delete"), 1);
        assert_eq!(cache.delete("a").await.expect("delete"), 0);
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let cache = backend(2);
        let ttl = Duration::from_secs(60);
        cache.set_ex("a", Bytes::from_static(b"1"), ttl).await.expect("set");
        cache.set_ex("b", Bytes::from_static(b"2"), ttl).await.expect("set");
        let _ = cache.get("a").await.expect("get");
        cache.set_ex("c", Bytes::from_static(b"3"), ttl).await.expect("set");

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[tokio::test]
    async fn unbounded_ttl_keeps_the_entry() {
        let cache = backend(2);
        cache
            .set_ex("a", Bytes::from_static(b"1"), Duration::MAX)
            .await
            .expect("set");
        assert!(cache.contains("a"));
        assert_eq!(
            cache.get("a").await.expect("get"),
            Some(Bytes::from_static(b"1"))
        );
    }
}
