//! Concurrent TTL map with lazy, read-time expiry.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// Entries expire `ttl` after insertion. Expiry is checked on read and nothing
/// sweeps in the background, so an unread stale entry stays resident.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K, V> fmt::Debug for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(self.ttl) {
                return Some(entry.value.clone());
            }
        }

        self.entries
            .remove_if(key, |_, entry| entry.is_expired(self.ttl));
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Number of resident entries, expired-but-unread ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-through lookup. On a miss `fetch` runs and its value is stored only
    /// when `is_valid` accepts it; rejected or absent values are returned uncached.
    pub async fn get_or_fetch<F, Fut, E, P>(&self, key: K, fetch: F, is_valid: P) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        P: FnOnce(&V) -> bool,
    {
        if let Some(value) = self.get(&key) {
            return Ok(Some(value));
        }

        let fetched = fetch().await?;
        if let Some(value) = &fetched {
            if is_valid(value) {
                self.insert(key, value.clone());
            }
        }
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_at_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&"k"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_through_fetches_once_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(30 * 60));
        let fetches = AtomicUsize::new(0);
        let fetch = || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Some("profile".to_string()))
        };

        let first = cache.get_or_fetch("u1", fetch, |_| true).await.unwrap();
        let second = cache.get_or_fetch("u1", fetch, |_| true).await.unwrap();
        assert_eq!(first.as_deref(), Some("profile"));
        assert_eq!(second.as_deref(), Some("profile"));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let _ = cache.get_or_fetch("u1", fetch, |_| true).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_values_are_not_cached() {
        let cache: TtlCache<&str, String> = TtlCache::new(Duration::from_secs(60));

        let value = cache
            .get_or_fetch("u1", || async { Ok::<_, String>(Some(String::new())) }, |v| !v.is_empty())
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some(""));
        assert!(cache.is_empty());

        let missing = cache
            .get_or_fetch("u2", || async { Ok::<_, String>(None) }, |_| true)
            .await
            .unwrap();
        assert!(missing.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_errors_propagate_uncached() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));
        let result = cache
            .get_or_fetch("u1", || async { Err::<Option<u32>, _>("down") }, |_| true)
            .await;
        assert_eq!(result, Err("down"));
        assert!(cache.is_empty());
    }
}
