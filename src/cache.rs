//! Request cache
//!
//! Results are cached in memory against a key derived from the request parameters. Entries
//! expire after a fixed time-to-live and the number of entries is bounded: when the cache is
//! full, expired entries are swept and then the least recently used entry is evicted.
//!
//! Keys are derived from a canonical JSON encoding of the request with object keys sorted, so
//! requests that differ only in field order share an entry.

use crate::metrics::{CACHE_EVICTIONS, CACHE_LOOKUPS};

use cached::{Cached, SizedCache};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Source of the current time.
///
/// Injected so that expiry can be tested without waiting.
pub trait Clock: Debug + Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// The current instant.
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_default()
    }
}

/// Wall clock time.
#[derive(Debug, Default)]
pub struct SystemClock {}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    payload: V,
    stored_at_ms: i64,
}

/// Cache statistics.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
    /// Keys currently held, sorted. May include expired entries not yet pruned.
    pub keys: Vec<String>,
}

type Entries<V> = SizedCache<String, CacheEntry<V>>;

/// Bounded, time-expiring cache of request results.
///
/// Recency and capacity are handled by a [SizedCache]; freshness is checked against the
/// injected [Clock] on every lookup.
pub struct RequestCache<V> {
    /// Name used in logs and metrics.
    name: &'static str,
    entries: Mutex<Entries<V>>,
    capacity: usize,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

impl<V> Debug for RequestCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("ttl_ms", &self.ttl_ms)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<V: Clone> RequestCache<V> {
    /// Create a new cache.
    ///
    /// # Arguments
    ///
    /// * `name`: Name used in logs and metrics
    /// * `capacity`: Maximum number of entries. Zero disables caching.
    /// * `ttl`: Time for which an entry is fresh
    /// * `clock`: Source of the current time
    pub fn new(name: &'static str, capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            // A sized store needs room for one entry; `set` stores nothing at zero capacity.
            entries: Mutex::new(SizedCache::with_size(capacity.max(1))),
            capacity,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries<V>> {
        // Entries are only mutated whole, so a poisoned lock still holds a usable store.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now_ms: i64) -> bool {
        now_ms.saturating_sub(entry.stored_at_ms) < self.ttl_ms
    }

    /// Returns the payload stored against `key` if present and fresh.
    ///
    /// A hit marks the entry as most recently used. A stale entry is removed and reported as
    /// a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now_ms = self.clock.now_ms();
        let key = key.to_string();
        let mut entries = self.lock();

        match entries.cache_get(&key) {
            Some(entry) if self.is_fresh(entry, now_ms) => {
                CACHE_LOOKUPS.with_label_values(&[self.name, "hit"]).inc();
                return Some(entry.payload.clone());
            }
            Some(_) => {}
            None => {
                CACHE_LOOKUPS.with_label_values(&[self.name, "miss"]).inc();
                return None;
            }
        }

        entries.cache_remove(&key);
        CACHE_LOOKUPS.with_label_values(&[self.name, "expired"]).inc();
        CACHE_EVICTIONS.with_label_values(&[self.name, "expired"]).inc();
        None
    }

    /// Store `payload` against `key`, replacing any previous entry.
    pub fn set(&self, key: String, payload: V) {
        if self.capacity == 0 {
            return;
        }
        let now_ms = self.clock.now_ms();
        let mut entries = self.lock();

        if entries.cache_remove(&key).is_none() && entries.cache_size() >= self.capacity {
            let expired = self.remove_expired(&mut entries, now_ms);
            if expired > 0 {
                tracing::debug!(cache = self.name, expired, "swept expired entries");
            }
            if entries.cache_size() >= self.capacity {
                // The store drops its least recently used entry on the next insert.
                if let Some(evicted) = entries.key_order().last() {
                    tracing::debug!(cache = self.name, key = %evicted, "evicted least recently used entry");
                }
                CACHE_EVICTIONS
                    .with_label_values(&[self.name, "capacity"])
                    .inc();
            }
        }

        entries.cache_set(
            key,
            CacheEntry {
                payload,
                stored_at_ms: now_ms,
            },
        );
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.lock().cache_clear();
        tracing::info!(cache = self.name, "cache cleared");
    }

    /// Remove expired entries, returning how many were removed.
    pub fn prune(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let mut entries = self.lock();
        self.remove_expired(&mut entries, now_ms)
    }

    /// Returns the number of entries, including expired entries not yet pruned.
    pub fn len(&self) -> usize {
        self.lock().cache_size()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        let mut keys: Vec<String> = entries.key_order().cloned().collect();
        keys.sort();
        CacheStats {
            size: entries.cache_size(),
            capacity: self.capacity,
            ttl_seconds: u64::try_from(self.ttl_ms / 1000).unwrap_or(0),
            keys,
        }
    }

    fn remove_expired(&self, entries: &mut Entries<V>, now_ms: i64) -> usize {
        let expired: Vec<String> = entries
            .key_order()
            .zip(entries.value_order())
            .filter(|(_, entry)| !self.is_fresh(entry, now_ms))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.cache_remove(key);
        }
        CACHE_EVICTIONS
            .with_label_values(&[self.name, "expired"])
            .inc_by(expired.len() as u64);
        expired.len()
    }
}

/// Write the canonical encoding of a JSON value: object keys sorted, no whitespace.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Returns the canonical JSON encoding of request parameters.
pub fn canonical_json<T: Serialize>(params: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

/// Derive a cache key from request parameters.
///
/// The key is `"{namespace}:{digest}"` where the digest is the MD5 hash of the canonical JSON
/// encoding of the parameters.
pub fn request_key<T: Serialize>(namespace: &str, params: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(params)?;
    Ok(format!("{}:{:x}", namespace, md5::compute(canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::{self, ManualClock};
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(30 * 60);

    fn cache(capacity: usize) -> (Arc<ManualClock>, RequestCache<String>) {
        let clock = Arc::new(ManualClock::fixed());
        let cache = RequestCache::new("test", capacity, TTL, clock.clone());
        (clock, cache)
    }

    #[test]
    fn set_then_get() {
        let (_, cache) = cache(10);
        cache.set("k".to_string(), "v".to_string());
        assert_eq!(Some("v".to_string()), cache.get("k"));
        assert_eq!(None, cache.get("other"));
    }

    #[test]
    fn set_overwrites() {
        let (_, cache) = cache(10);
        cache.set("k".to_string(), "v1".to_string());
        cache.set("k".to_string(), "v2".to_string());
        assert_eq!(Some("v2".to_string()), cache.get("k"));
        assert_eq!(1, cache.len());
    }

    #[test]
    fn expires_after_ttl() {
        let (clock, cache) = cache(10);
        cache.set("k".to_string(), "v".to_string());
        clock.advance(TTL - Duration::from_millis(1));
        assert_eq!(Some("v".to_string()), cache.get("k"));
        clock.advance(Duration::from_millis(1));
        assert_eq!(None, cache.get("k"));
        // Stale entries are dropped on lookup.
        assert!(cache.is_empty());
    }

    #[test]
    fn overwrite_refreshes_ttl() {
        let (clock, cache) = cache(10);
        cache.set("k".to_string(), "v1".to_string());
        clock.advance(TTL / 2);
        cache.set("k".to_string(), "v2".to_string());
        clock.advance(TTL / 2 + Duration::from_secs(1));
        assert_eq!(Some("v2".to_string()), cache.get("k"));
    }

    #[test]
    fn clear_removes_everything() {
        let (_, cache) = cache(10);
        cache.set("a".to_string(), "1".to_string());
        cache.set("b".to_string(), "2".to_string());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(None, cache.get("a"));
    }

    #[test]
    fn evicts_least_recently_used() {
        let (_, cache) = cache(2);
        cache.set("a".to_string(), "1".to_string());
        cache.set("b".to_string(), "2".to_string());
        // Touch "a" so that "b" becomes the least recently used.
        assert!(cache.get("a").is_some());
        cache.set("c".to_string(), "3".to_string());
        assert_eq!(2, cache.len());
        assert_eq!(Some("1".to_string()), cache.get("a"));
        assert_eq!(None, cache.get("b"));
        assert_eq!(Some("3".to_string()), cache.get("c"));
    }

    #[test]
    fn overwrite_and_hits_refresh_recency() {
        let (_, cache) = cache(3);
        cache.set("a".to_string(), "1".to_string());
        cache.set("b".to_string(), "2".to_string());
        cache.set("c".to_string(), "3".to_string());
        cache.set("a".to_string(), "4".to_string());
        assert!(cache.get("b").is_some());
        cache.set("d".to_string(), "5".to_string());
        assert_eq!(
            vec!["a".to_string(), "b".to_string(), "d".to_string()],
            cache.stats().keys
        );
        assert_eq!(Some("4".to_string()), cache.get("a"));
    }

    #[test]
    fn sweeps_expired_before_evicting() {
        let (clock, cache) = cache(2);
        cache.set("old".to_string(), "1".to_string());
        clock.advance(TTL);
        cache.set("fresh".to_string(), "2".to_string());
        cache.set("new".to_string(), "3".to_string());
        assert_eq!(Some("2".to_string()), cache.get("fresh"));
        assert_eq!(Some("3".to_string()), cache.get("new"));
        assert_eq!(2, cache.len());
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let (_, cache) = cache(0);
        cache.set("k".to_string(), "v".to_string());
        assert_eq!(None, cache.get("k"));
    }

    #[test]
    fn prune_removes_expired() {
        let (clock, cache) = cache(10);
        cache.set("a".to_string(), "1".to_string());
        clock.advance(Duration::from_secs(60));
        cache.set("b".to_string(), "2".to_string());
        clock.advance(TTL - Duration::from_secs(30));
        assert_eq!(1, cache.prune());
        assert_eq!(vec!["b".to_string()], cache.stats().keys);
    }

    #[test]
    fn stats() {
        let (_, cache) = cache(5);
        cache.set("b".to_string(), "2".to_string());
        cache.set("a".to_string(), "1".to_string());
        assert_eq!(
            CacheStats {
                size: 2,
                capacity: 5,
                ttl_seconds: 1800,
                keys: vec!["a".to_string(), "b".to_string()],
            },
            cache.stats()
        );
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"d": [true, null], "c": "x"}});
        assert_eq!(
            r#"{"a":{"c":"x","d":[true,null]},"b":1}"#,
            canonical_json(&value).unwrap()
        );
    }

    #[test]
    fn request_key_is_order_independent() {
        let first = json!({"bounds": {"north": 1.0, "south": 0.0}, "filters": {"a": 1, "b": 2}});
        let second = json!({"filters": {"b": 2, "a": 1}, "bounds": {"south": 0.0, "north": 1.0}});
        assert_eq!(
            request_key("spatial", &first).unwrap(),
            request_key("spatial", &second).unwrap()
        );
    }

    #[test]
    fn request_key_distinguishes_requests() {
        let request_data = test_utils::get_test_request_data();
        let mut other = request_data.clone();
        other.bounds.north = -14.0;
        let key = request_key("spatial", &request_data).unwrap();
        assert!(key.starts_with("spatial:"));
        assert_eq!(8 + 32, key.len());
        assert_ne!(key, request_key("spatial", &other).unwrap());
        assert_ne!(key, request_key("temporal", &request_data).unwrap());
    }
}
