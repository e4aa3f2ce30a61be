// =============================================================================
// Response Cache: TTL key/value store in front of every upstream read
// =============================================================================
//
// Entries live for a single fixed TTL. Expiry is checked lazily on read; a
// background sweep (see main.rs) and a least-recently-used bound keep the map
// from growing without limit in a long-lived process.
//
// Concurrent misses on the same key are coalesced: the first caller runs the
// fetch, later callers await the same `OnceCell` and share its result. Only
// successful results are stored.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::clock::Clock;
use crate::error::MarketError;

/// Default time-to-live for every key.
pub const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;

/// Default upper bound on the number of live entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    stored_at_ms: i64,
    ttl_ms: i64,
    last_access_ms: i64,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.stored_at_ms < self.ttl_ms
    }
}

type InFlight<V> = Arc<OnceCell<Result<V, MarketError>>>;

/// What a caller that missed the cache should do next.
enum Claim<V> {
    /// The value landed between the first lookup and the in-flight check.
    Cached(V),
    /// Another caller is fetching; wait on its cell.
    Joined(InFlight<V>),
    /// No fetch is running; this caller runs it.
    Leader(InFlight<V>),
}

/// Serialisable view of the cache counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
}

// ---------------------------------------------------------------------------
// ResponseCache
// ---------------------------------------------------------------------------

pub struct ResponseCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<String, InFlight<V>>>,
    ttl_ms: i64,
    max_entries: usize,
    clock: Arc<dyn Clock>,

    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache whose entries expire `ttl_ms` after being stored and
    /// which holds at most `max_entries` keys.
    pub fn new(ttl_ms: i64, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            ttl_ms,
            max_entries: max_entries.max(1),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the payload for `key` if it is still fresh. A stale entry is
    /// dropped and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.is_fresh(now) => {
                entry.last_access_ms = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.payload.clone())
            }
            Some(_) => {
                entries.remove(key);
                debug!(key, "cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            self.make_room(&mut entries, now);
        }

        entries.insert(
            key,
            CacheEntry {
                payload: value,
                stored_at_ms: now,
                ttl_ms: self.ttl_ms,
                last_access_ms: now,
            },
        );
    }

    /// Resolve `key` from the cache, or run `fetch` exactly once across all
    /// concurrent callers asking for the same key.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V, MarketError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, MarketError>>,
    {
        if let Some(hit) = self.get(key) {
            debug!(key, "cache hit");
            return Ok(hit);
        }

        let cell = match self.claim(key) {
            Claim::Cached(hit) => {
                debug!(key, "cache filled while waiting for the in-flight lock");
                return Ok(hit);
            }
            Claim::Joined(cell) | Claim::Leader(cell) => cell,
        };

        let result = cell
            .get_or_init(|| async move {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss, fetching upstream");
                let fetched = fetch().await;
                if let Ok(value) = &fetched {
                    self.set(key, value.clone());
                }
                fetched
            })
            .await
            .clone();

        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(key);
        }

        result
    }

    /// Join the running fetch for `key` or register a new one. The cache is
    /// checked again under the in-flight lock: a leader stores its value
    /// before it removes its cell, so a caller arriving after that removal
    /// finds the value instead of starting a second fetch.
    fn claim(&self, key: &str) -> Claim<V> {
        let mut in_flight = self.in_flight.lock();
        if let Some(cell) = in_flight.get(key) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(key, "joining in-flight fetch");
            return Claim::Joined(cell.clone());
        }
        if let Some(hit) = self.get(key) {
            return Claim::Cached(hit);
        }

        let cell: InFlight<V> = Arc::new(OnceCell::new());
        in_flight.insert(key.to_string(), cell.clone());
        Claim::Leader(cell)
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Free one slot: expired entries go first, then the least recently used.
    fn make_room(&self, entries: &mut HashMap<String, CacheEntry<V>>, now: i64) {
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        if entries.len() < before {
            return;
        }

        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access_ms)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "evicted least recently used cache entry");
        }
    }
}

impl<V> std::fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl_ms", &self.ttl_ms)
            .field("max_entries", &self.max_entries)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cache_with_clock(max_entries: usize) -> (ResponseCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = ResponseCache::new(DEFAULT_TTL_MS, max_entries, clock.clone());
        (cache, clock)
    }

    #[test]
    fn claim_after_leader_finished_reads_the_stored_value() {
        let (cache, _clock) = cache_with_clock(8);

        // First claim on an empty cache leads; a second one joins it.
        let leader = match cache.claim("k") {
            Claim::Leader(cell) => cell,
            _ => panic!("expected to lead the fetch"),
        };
        assert!(matches!(cache.claim("k"), Claim::Joined(_)));

        // The leader stores its value and retires its cell; a caller that
        // missed before the store must now see the value, not start over.
        cache.set("k", "v".to_string());
        cache.in_flight.lock().remove("k");
        drop(leader);

        match cache.claim("k") {
            Claim::Cached(value) => assert_eq!(value, "v"),
            _ => panic!("expected the stored value"),
        }
        assert!(cache.in_flight.lock().is_empty());
    }

    #[test]
    fn get_immediately_after_set_returns_value() {
        let (cache, _clock) = cache_with_clock(8);
        cache.set("markets-bitcoin-eur", "payload".to_string());
        assert_eq!(cache.get("markets-bitcoin-eur").as_deref(), Some("payload"));
    }

    #[test]
    fn entry_expires_exactly_at_ttl() {
        let (cache, clock) = cache_with_clock(8);
        cache.set("k", "v".to_string());

        clock.advance_ms(DEFAULT_TTL_MS - 1);
        assert!(cache.get("k").is_some());

        clock.advance_ms(1);
        assert!(cache.get("k").is_none());
        // The stale entry is discarded on read.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn set_overwrites_and_restarts_ttl() {
        let (cache, clock) = cache_with_clock(8);
        cache.set("k", "old".to_string());
        clock.advance_ms(DEFAULT_TTL_MS - 10);
        cache.set("k", "new".to_string());
        clock.advance_ms(100);
        assert_eq!(cache.get("k").as_deref(), Some("new"));
    }

    #[test]
    fn full_cache_evicts_least_recently_used() {
        let (cache, clock) = cache_with_clock(2);
        cache.set("a", "1".to_string());
        clock.advance_ms(10);
        cache.set("b", "2".to_string());
        clock.advance_ms(10);
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        clock.advance_ms(10);
        cache.set("c", "3".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn full_cache_prefers_dropping_expired_entries() {
        let (cache, clock) = cache_with_clock(2);
        cache.set("stale", "1".to_string());
        clock.advance_ms(DEFAULT_TTL_MS);
        cache.set("fresh", "2".to_string());
        cache.set("newer", "3".to_string());

        assert_eq!(cache.stats().evictions, 0);
        assert!(cache.get("fresh").is_some());
        assert!(cache.get("newer").is_some());
    }

    #[test]
    fn purge_expired_removes_only_stale_entries() {
        let (cache, clock) = cache_with_clock(8);
        cache.set("old", "1".to_string());
        clock.advance_ms(DEFAULT_TTL_MS / 2);
        cache.set("young", "2".to_string());
        clock.advance_ms(DEFAULT_TTL_MS / 2);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("young").is_some());
    }

    #[tokio::test]
    async fn get_or_fetch_stores_successful_result() {
        let (cache, _clock) = cache_with_clock(8);
        let calls = &AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_fetch("k", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("fetched".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "fetched");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn get_or_fetch_does_not_cache_errors() {
        let (cache, _clock) = cache_with_clock(8);
        let calls = &AtomicUsize::new(0);

        for _ in 0..2 {
            let err = cache
                .get_or_fetch("k", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<String, _>(MarketError::upstream(Some(500), "boom"))
                })
                .await
                .unwrap_err();
            assert!(matches!(err, MarketError::UpstreamUnavailable { .. }));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let (cache, _clock) = cache_with_clock(8);
        let calls = &AtomicUsize::new(0);

        let fetch = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("shared".to_string())
        };

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch("k", fetch),
            cache.get_or_fetch("k", fetch),
            cache.get_or_fetch("k", fetch),
        );

        assert_eq!(a.unwrap(), "shared");
        assert_eq!(b.unwrap(), "shared");
        assert_eq!(c.unwrap(), "shared");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().coalesced, 2);
    }

    #[tokio::test]
    async fn distinct_keys_fetch_independently() {
        let (cache, _clock) = cache_with_clock(8);
        let calls = &AtomicUsize::new(0);

        let fetch = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("v".to_string())
        };

        let (a, b) = tokio::join!(cache.get_or_fetch("a", fetch), cache.get_or_fetch("b", fetch));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
