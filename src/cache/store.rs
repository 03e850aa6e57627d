//! Response cache storage.
//!
//! Entries carry their own TTL. Expired entries are treated as absent on read
//! and removed lazily; [`ResponseCache::sweep`] removes the rest in bulk.

use std::sync::RwLock;
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "fetchwell_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "fetchwell_cache_miss_total";
pub(crate) const METRIC_CACHE_EXPIRED: &str = "fetchwell_cache_expired_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "fetchwell_cache_evict_total";
pub(crate) const METRIC_CACHE_SWEPT: &str = "fetchwell_cache_swept_total";

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// In-memory response cache keyed by logical request identity.
pub struct ResponseCache<V> {
    entries: RwLock<LruCache<CacheKey, CacheEntry<V>>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
        }
    }

    /// Return the stored value when its age is within its TTL.
    ///
    /// A stale entry is removed as a side effect.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                debug!(key = %key, "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => {}
            None => {
                counter!(METRIC_CACHE_MISS).increment(1);
                return None;
            }
        }

        entries.pop(key);
        counter!(METRIC_CACHE_EXPIRED).increment(1);
        counter!(METRIC_CACHE_MISS).increment(1);
        debug!(key = %key, "cache entry expired");
        None
    }

    /// Store `value` under `key`, replacing any existing entry and stamping the current time.
    pub fn set(&self, key: CacheKey, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        let displaced = rw_write(&self.entries, SOURCE, "set").push(key.clone(), entry);
        match displaced {
            Some((evicted, _)) if evicted != key => {
                counter!(METRIC_CACHE_EVICT).increment(1);
                debug!(key = %evicted, "cache entry evicted for capacity");
            }
            _ => {}
        }
    }

    /// Remove one entry, or every entry when `key` is `None`.
    pub fn invalidate(&self, key: Option<&CacheKey>) {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
        match key {
            Some(key) => {
                entries.pop(key);
            }
            None => entries.clear(),
        }
    }

    /// Remove every entry recorded for `endpoint`, whatever its parameters.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_endpoint");
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.belongs_to(endpoint))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Remove every entry whose age exceeds its TTL. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "sweep");
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            counter!(METRIC_CACHE_SWEPT).increment(expired.len() as u64);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::keys::QueryParams;

    fn key(name: &str) -> CacheKey {
        CacheKey::endpoint(name)
    }

    fn cache() -> ResponseCache<String> {
        ResponseCache::new(&CacheConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_served_until_ttl_elapses() {
        let store = cache();
        store.set(key("makes"), "list".into(), Duration::from_millis(5000));

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert_eq!(store.get(&key("makes")).as_deref(), Some("list"));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(store.get(&key("makes")).is_none());
        // the stale entry was dropped by the read
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_at_exactly_ttl_is_still_fresh() {
        let store = cache();
        store.set(key("k"), "v".into(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get(&key("k")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn set_restamps_existing_entry() {
        let store = cache();
        store.set(key("k"), "old".into(), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        store.set(key("k"), "new".into(), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get(&key("k")).as_deref(), Some("new"));
    }

    #[test]
    fn invalidate_is_idempotent() {
        let store = cache();
        store.set(key("a"), "1".into(), Duration::from_secs(60));
        store.set(key("b"), "2".into(), Duration::from_secs(60));

        store.invalidate(Some(&key("missing")));
        assert_eq!(store.len(), 2);

        store.invalidate(Some(&key("a")));
        store.invalidate(Some(&key("a")));
        assert!(store.get(&key("a")).is_none());
        assert_eq!(store.len(), 1);

        store.invalidate(None);
        assert!(store.is_empty());
    }

    #[test]
    fn invalidate_endpoint_removes_all_parameter_variants() {
        let store = cache();
        let ttl = Duration::from_secs(60);
        let models = |make: &str| CacheKey::new("/models", &QueryParams::new().with("make", make));
        store.set(models("Kia"), "k".into(), ttl);
        store.set(models("BMW"), "b".into(), ttl);
        store.set(key("/models"), "all".into(), ttl);
        store.set(key("/models/extra"), "x".into(), ttl);

        assert_eq!(store.invalidate_endpoint("/models"), 3);
        assert_eq!(store.invalidate_endpoint("/models"), 0);
        assert!(store.get(&key("/models/extra")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let store = cache();
        store.set(key("short"), "s".into(), Duration::from_secs(5));
        store.set(key("long"), "l".into(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&key("long")).is_some());
        assert_eq!(store.sweep(), 0);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let store: ResponseCache<u32> = ResponseCache::new(&CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        let ttl = Duration::from_secs(60);
        store.set(key("1"), 1, ttl);
        store.set(key("2"), 2, ttl);
        // touch 1 so 2 becomes the eviction candidate
        assert_eq!(store.get(&key("1")), Some(1));
        store.set(key("3"), 3, ttl);

        assert_eq!(store.get(&key("1")), Some(1));
        assert!(store.get(&key("2")).is_none());
        assert_eq!(store.get(&key("3")), Some(3));
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = cache();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("entries lock");
            panic!("poison entries lock");
        }));

        store.set(key("k"), "v".into(), Duration::from_secs(60));
        assert!(store.get(&key("k")).is_some());
    }
}
