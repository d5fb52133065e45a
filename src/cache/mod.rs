//! Read-through cache with TTL freshness and a stale-read escape hatch.
//!
//! The cache is an optimization, never a source of truth: every store failure
//! is logged and treated as a miss, and nothing here returns an error to the
//! caller's primary data path. Expiry is lazy. Entries stay in the store until
//! they are removed by key, by prefix, or by an explicit `cleanup_expired`.

pub mod store;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::core::error::ErrorKind;
use crate::resilience::classify::Classify;
use store::KeyValueStore;

/// Namespace prepended to every key written by the cache.
pub const DEFAULT_NAMESPACE: &str = "wick-cache:";

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// What is persisted for each key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub data: T,
    pub stored_at: i64,
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.stored_at
    }

    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms) < self.ttl_ms as i64
    }
}

/// Result of a read that ignores TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRead<T> {
    pub data: T,
    pub is_stale: bool,
}

/// Where a `get_or_fetch` value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fresh cache hit, no network call.
    Cache,
    /// Live fetch, now stored.
    Remote,
    /// Live fetch failed for lack of connectivity; value may be expired.
    StaleFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,
    pub origin: Origin,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

/// Diagnostic view of a stored entry, independent of its payload type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub key: String,
    pub stored_at: i64,
    pub ttl_ms: u64,
    pub age_ms: i64,
    pub is_fresh: bool,
}

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    namespace: String,
}

impl Cache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = match self.store.get_item(&self.store_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::debug!("Cache entry {} does not decode, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Store `data` under `key`, replacing any previous entry.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            data,
            stored_at: self.clock.now_ms(),
            ttl_ms: ttl.as_millis() as u64,
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Cache entry {} does not encode: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set_item(&self.store_key(key), &raw) {
            log::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    /// The stored value if it exists and is still fresh. Never deletes.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now_ms();
        self.load::<T>(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.data)
    }

    /// The stored value regardless of freshness, tagged with whether it expired.
    pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<StaleRead<T>> {
        let now = self.clock.now_ms();
        self.load::<T>(key).map(|entry| StaleRead {
            is_stale: !entry.is_fresh(now),
            data: entry.data,
        })
    }

    /// Fresh hit, else live fetch (stored on success), else stale data when
    /// and only when the fetch failed for lack of connectivity.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Fetched<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display + Classify,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(data) = self.get::<T>(key) {
            return Ok(Fetched {
                data,
                origin: Origin::Cache,
                is_stale: false,
            });
        }

        match fetch().await {
            Ok(data) => {
                self.set(key, &data, ttl);
                Ok(Fetched {
                    data,
                    origin: Origin::Remote,
                    is_stale: false,
                })
            }
            Err(e) => {
                if e.classification().kind != ErrorKind::Network {
                    return Err(e);
                }
                match self.get_stale::<T>(key) {
                    Some(stale) => {
                        log::info!("Offline, serving cached {} (stale: {})", key, stale.is_stale);
                        Ok(Fetched {
                            data: stale.data,
                            origin: Origin::StaleFallback,
                            is_stale: stale.is_stale,
                        })
                    }
                    None => Err(e),
                }
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.store.remove_item(&self.store_key(key)) {
            log::warn!("Cache remove failed for {}: {}", key, e);
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        match self.store.list_keys(&self.store_key(prefix)) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Cache listing failed for prefix {}: {}", prefix, e);
                Vec::new()
            }
        }
    }

    fn remove_raw(&self, keys: &[String]) -> usize {
        let mut removed = 0;
        for raw_key in keys {
            match self.store.remove_item(raw_key) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Cache remove failed for {}: {}", raw_key, e),
            }
        }
        removed
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn clear_by_prefix(&self, prefix: &str) -> usize {
        let keys = self.keys_with_prefix(prefix);
        let removed = self.remove_raw(&keys);
        log::debug!("Cleared {} cache entries under '{}'", removed, prefix);
        removed
    }

    pub fn clear(&self) -> usize {
        self.clear_by_prefix("")
    }

    /// Remove entries matching `pattern`: a trailing `*` matches by prefix,
    /// anything else is an exact key.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        match pattern.strip_suffix('*') {
            Some(prefix) => self.clear_by_prefix(prefix),
            None => {
                let raw_key = self.store_key(pattern);
                match self.store.get_item(&raw_key) {
                    Ok(Some(_)) => self.remove_raw(&[raw_key]),
                    _ => 0,
                }
            }
        }
    }

    /// Every entry with its freshness, in key order.
    pub fn entries(&self) -> Vec<EntryInfo> {
        let now = self.clock.now_ms();
        self.keys_with_prefix("")
            .into_iter()
            .filter_map(|raw_key| {
                let key = raw_key.strip_prefix(&self.namespace)?.to_string();
                let entry = self.load::<serde_json::Value>(&key)?;
                Some(EntryInfo {
                    age_ms: entry.age_ms(now),
                    is_fresh: entry.is_fresh(now),
                    stored_at: entry.stored_at,
                    ttl_ms: entry.ttl_ms,
                    key,
                })
            })
            .collect()
    }

    /// Explicit sweep of expired entries. Nothing calls this implicitly.
    pub fn cleanup_expired(&self) -> usize {
        let expired: Vec<String> = self
            .entries()
            .into_iter()
            .filter(|e| !e.is_fresh)
            .map(|e| self.store_key(&e.key))
            .collect();
        self.remove_raw(&expired)
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        let expired = entries.iter().filter(|e| !e.is_fresh).count();
        CacheStats {
            total_entries: entries.len(),
            expired_entries: expired,
            active_entries: entries.len() - expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{RemoteError, StoreError};
    use store::MemoryStore;

    fn cache() -> (Cache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = Cache::with_clock(Arc::new(MemoryStore::new()), clock.clone());
        (cache, clock)
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Poisoned)
        }
        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
        fn remove_item(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
        fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    #[test]
    fn fresh_then_stale() {
        let (cache, clock) = cache();
        cache.set("summary:e1", &"Quarterly numbers".to_string(), Duration::from_millis(1000));

        clock.advance(Duration::from_millis(500));
        assert_eq!(cache.get::<String>("summary:e1").as_deref(), Some("Quarterly numbers"));

        clock.advance(Duration::from_millis(1000));
        assert_eq!(cache.get::<String>("summary:e1"), None);
        let stale = cache.get_stale::<String>("summary:e1").unwrap();
        assert!(stale.is_stale);
        assert_eq!(stale.data, "Quarterly numbers");
    }

    #[test]
    fn expiry_is_exactly_at_ttl() {
        let (cache, clock) = cache();
        cache.set("k", &1u32, Duration::from_millis(1000));
        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get::<u32>("k"), Some(1));
        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[test]
    fn expired_reads_do_not_delete() {
        let (cache, clock) = cache();
        cache.set("k", &1u32, Duration::from_millis(10));
        clock.advance(Duration::from_millis(50));
        assert_eq!(cache.get::<u32>("k"), None);
        assert_eq!(cache.stats().total_entries, 1);
        assert!(cache.get_stale::<u32>("k").is_some());
    }

    #[test]
    fn set_overwrites_and_restarts_ttl() {
        let (cache, clock) = cache();
        cache.set("k", &1u32, Duration::from_millis(100));
        clock.advance(Duration::from_millis(150));
        cache.set("k", &2u32, Duration::from_millis(100));
        assert_eq!(cache.get::<u32>("k"), Some(2));
    }

    #[test]
    fn wrong_type_is_a_miss() {
        let (cache, _) = cache();
        cache.set("k", &"text", Duration::from_secs(60));
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[test]
    fn clear_by_prefix_leaves_other_keys() {
        let (cache, _) = cache();
        let ttl = Duration::from_secs(60);
        cache.set("plan:2026-01-13", &"plan1", ttl);
        cache.set("plan:2026-01-14", &"plan2", ttl);
        cache.set("email:123", &"email1", ttl);

        assert_eq!(cache.clear_by_prefix("plan:"), 2);
        assert_eq!(cache.get::<String>("plan:2026-01-13"), None);
        assert_eq!(cache.get::<String>("email:123").as_deref(), Some("email1"));
    }

    #[test]
    fn invalidate_pattern_exact_and_wildcard() {
        let (cache, _) = cache();
        let ttl = Duration::from_secs(60);
        cache.set("plan:a", &1u8, ttl);
        cache.set("plan:b", &2u8, ttl);
        cache.set("plan", &3u8, ttl);

        assert_eq!(cache.invalidate_pattern("plan"), 1);
        assert_eq!(cache.invalidate_pattern("plan"), 0);
        assert_eq!(cache.invalidate_pattern("plan:*"), 2);
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn cleanup_and_stats() {
        let (cache, clock) = cache();
        cache.set("short", &1u8, Duration::from_millis(10));
        cache.set("long", &2u8, Duration::from_secs(60));
        clock.advance(Duration::from_millis(20));

        assert_eq!(
            cache.stats(),
            CacheStats { total_entries: 2, expired_entries: 1, active_entries: 1 }
        );
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.entries().len(), 1);
        assert_eq!(cache.entries()[0].key, "long");
    }

    #[test]
    fn namespaces_do_not_see_each_other() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let a = Cache::new(store.clone()).with_namespace("a:");
        let b = Cache::new(store.clone()).with_namespace("b:");
        a.set("k", &1u8, Duration::from_secs(60));
        assert_eq!(b.get::<u8>("k"), None);
        assert_eq!(b.clear(), 0);
        assert_eq!(a.get::<u8>("k"), Some(1));
    }

    #[test]
    fn store_failures_are_misses() {
        let cache = Cache::new(Arc::new(BrokenStore));
        cache.set("k", &1u8, Duration::from_secs(60));
        assert_eq!(cache.get::<u8>("k"), None);
        assert!(cache.get_stale::<u8>("k").is_none());
        assert_eq!(cache.clear_by_prefix(""), 0);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn get_or_fetch_prefers_fresh_cache() {
        let (cache, _) = cache();
        cache.set("k", &1u32, Duration::from_secs(60));
        let got = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                Err::<u32, RemoteError>(RemoteError::Network("unreachable".into()))
            })
            .await
            .unwrap();
        assert_eq!(got.data, 1);
        assert_eq!(got.origin, Origin::Cache);
    }

    #[tokio::test]
    async fn get_or_fetch_stores_remote_value() {
        let (cache, _) = cache();
        let got = cache
            .get_or_fetch("k", Duration::from_secs(60), || async { Ok::<u32, RemoteError>(9) })
            .await
            .unwrap();
        assert_eq!(got.origin, Origin::Remote);
        assert_eq!(cache.get::<u32>("k"), Some(9));
    }

    #[tokio::test]
    async fn stale_fallback_only_when_offline() {
        let (cache, clock) = cache();
        cache.set("k", &1u32, Duration::from_millis(100));
        clock.advance(Duration::from_secs(1));

        let offline = cache
            .get_or_fetch("k", Duration::from_millis(100), || async {
                Err::<u32, RemoteError>(RemoteError::Network("connection refused".into()))
            })
            .await
            .unwrap();
        assert_eq!(offline.origin, Origin::StaleFallback);
        assert!(offline.is_stale);
        assert_eq!(offline.data, 1);

        let rejected = cache
            .get_or_fetch("k", Duration::from_millis(100), || async {
                Err::<u32, RemoteError>(RemoteError::Status { status: 500, body: "boom".into() })
            })
            .await;
        assert_eq!(
            rejected,
            Err(RemoteError::Status { status: 500, body: "boom".into() })
        );
    }

    #[tokio::test]
    async fn offline_url_digits_still_fall_back() {
        let (cache, clock) = cache();
        cache.set("summary:503", &7u32, Duration::from_millis(100));
        clock.advance(Duration::from_secs(1));

        let offline = cache
            .get_or_fetch("summary:503", Duration::from_millis(100), || async {
                Err::<u32, RemoteError>(RemoteError::Network(
                    "error sending request for url (https://api.example.test/emails/503/summary)"
                        .into(),
                ))
            })
            .await
            .unwrap();
        assert_eq!(offline.origin, Origin::StaleFallback);
        assert_eq!(offline.data, 7);
    }

    #[tokio::test]
    async fn offline_without_cached_value_propagates() {
        let (cache, _) = cache();
        let res = cache
            .get_or_fetch("missing", Duration::from_secs(1), || async {
                Err::<u32, RemoteError>(RemoteError::Network("timed out".into()))
            })
            .await;
        assert!(res.is_err());
    }
}
