//! Read-through cache for expensive dashboard reads.
//!
//! Entries are kept per string key with the time they were stored. A read is
//! served from memory while the entry is younger than the caller's TTL;
//! otherwise one fetch runs and every concurrent caller for the same key
//! awaits that fetch. Stale entries are not swept in the background, they are
//! replaced on the next read. Failed fetches are never stored.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::{CacheError, FetchError};
use crate::config::CacheConfig;

/// A cached value and the time it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub data: V,
    pub stored_at: Instant,
}

type Flight<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

struct Slot<V> {
    entry: Option<CacheEntry<V>>,
    /// Fetch currently running for this key, tagged with its flight number.
    flight: Option<(u64, Flight<V>)>,
}

impl<V> Slot<V> {
    fn empty() -> Self {
        Self {
            entry: None,
            flight: None,
        }
    }
}

/// Keyed TTL cache with single-flight loading.
pub struct TtlCache<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
    next_flight: AtomicU64,
    default_ttl: Duration,
    max_entries: usize,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(1),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.default_ttl, config.max_entries)
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the cached value for `key` if it is younger than `ttl`,
    /// otherwise runs `fetch` (or joins the fetch already running for `key`)
    /// and caches its result.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::FetchFailed` when the fetch fails; nothing is
    /// cached in that case and the next call fetches again.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        self.load(key, Some(ttl), fetch).await
    }

    /// [`get_or_fetch`](Self::get_or_fetch) with the configured default TTL.
    ///
    /// # Errors
    ///
    /// Same as [`get_or_fetch`](Self::get_or_fetch).
    pub async fn get_or_fetch_default<F, Fut, E>(
        &self,
        key: &str,
        fetch: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        self.load(key, Some(self.default_ttl), fetch).await
    }

    /// Ignores any cached value and fetches again. A fetch already running
    /// for `key` is joined rather than duplicated.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::FetchFailed` when the fetch fails; the previously
    /// cached value, if any, is kept.
    pub async fn force_refresh<F, Fut, E>(&self, key: &str, fetch: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        self.load(key, None, fetch).await
    }

    async fn load<F, Fut, E>(
        &self,
        key: &str,
        freshness: Option<Duration>,
        fetch: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let (flight_id, flight) = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.to_owned()).or_insert_with(Slot::empty);

            if let Some(ttl) = freshness
                && let Some(entry) = &slot.entry
                && entry.stored_at.elapsed() < ttl
            {
                debug!(key, "cache hit");
                return Ok(entry.data.clone());
            }

            if let Some((flight_id, flight)) = &slot.flight {
                debug!(key, flight_id, "joining in-flight fetch");
                (*flight_id, flight.clone())
            } else {
                let flight_id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let failed_key = key.to_owned();
                let flight = fetch()
                    .map(move |result| {
                        result.map_err(|e| {
                            let boxed: Box<dyn StdError + Send + Sync + 'static> = e.into();
                            CacheError::FetchFailed {
                                key: failed_key,
                                source: FetchError::from(boxed),
                            }
                        })
                    })
                    .boxed()
                    .shared();
                debug!(key, flight_id, "cache miss, fetching");
                slot.flight = Some((flight_id, flight.clone()));
                (flight_id, flight)
            }
        };

        let result = flight.await;
        self.settle(key, flight_id, &result);
        result
    }

    /// Records the outcome of flight `flight_id`. Only the first waiter to
    /// settle a flight stores its value; detached flights store nothing.
    fn settle(&self, key: &str, flight_id: u64, result: &Result<V, CacheError>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        if !matches!(&slot.flight, Some((current, _)) if *current == flight_id) {
            return;
        }
        slot.flight = None;

        match result {
            Ok(data) => {
                slot.entry = Some(CacheEntry {
                    key: key.to_owned(),
                    data: data.clone(),
                    stored_at: Instant::now(),
                });
                self.enforce_capacity(&mut slots, key);
            }
            Err(error) => {
                warn!(key, %error, "cache fetch failed, nothing stored");
                if slot.entry.is_none() {
                    slots.remove(key);
                }
            }
        }
    }

    /// Evicts the oldest idle entries until at most `max_entries` remain.
    fn enforce_capacity(&self, slots: &mut HashMap<String, Slot<V>>, keep: &str) {
        while slots.values().filter(|s| s.entry.is_some()).count() > self.max_entries {
            let oldest = slots
                .iter()
                .filter(|(k, s)| k.as_str() != keep && s.flight.is_none())
                .filter_map(|(k, s)| s.entry.as_ref().map(|e| (k, e.stored_at)))
                .min_by_key(|(_, stored_at)| *stored_at)
                .map(|(k, _)| k.clone());
            let Some(oldest) = oldest else {
                break;
            };
            debug!(key = %oldest, "evicting oldest cache entry");
            slots.remove(&oldest);
        }
    }

    /// Drops the entry for `key` and detaches any fetch running for it, so
    /// the next read fetches again.
    pub fn invalidate(&self, key: &str) {
        if self.slots.lock().remove(key).is_some() {
            debug!(key, "cache entry invalidated");
        }
    }

    /// Drops every entry and detaches every running fetch.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Removes idle entries stored more than `max_age` ago; returns how many.
    #[must_use]
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            slot.flight.is_some()
                || slot
                    .entry
                    .as_ref()
                    .is_some_and(|e| e.stored_at.elapsed() <= max_age)
        });
        before - slots.len()
    }

    /// Time since the entry for `key` was stored.
    #[must_use]
    pub fn age(&self, key: &str) -> Option<Duration> {
        self.slots
            .lock()
            .get(key)
            .and_then(|slot| slot.entry.as_ref())
            .map(|e| e.stored_at.elapsed())
    }

    #[must_use]
    pub fn is_fresh(&self, key: &str, ttl: Duration) -> bool {
        self.age(key).is_some_and(|age| age < ttl)
    }

    /// Cached value for `key` regardless of age.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.slots.lock().get(key).and_then(|slot| slot.entry.clone())
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    const TTL: Duration = Duration::from_secs(300);

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, StdFetchError>> + use<> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    type StdFetchError = std::io::Error;

    fn failing_fetch(
        calls: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, StdFetchError>> + use<> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(std::io::Error::other("stats service down"))
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            cache.get_or_fetch("stats", TTL, counting_fetch(&calls, 7)),
            cache.get_or_fetch("stats", TTL, counting_fetch(&calls, 8)),
            cache.get_or_fetch("stats", TTL, counting_fetch(&calls, 9)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (7, 7, 7));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_fresh_until_ttl_elapses() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("leaks", TTL, counting_fetch(&calls, 1))
            .await
            .unwrap();
        assert_eq!(cache.age("leaks"), Some(Duration::ZERO));

        tokio::time::advance(Duration::from_millis(299_999)).await;
        let hit = cache
            .get_or_fetch("leaks", TTL, counting_fetch(&calls, 2))
            .await
            .unwrap();
        assert_eq!(hit, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(!cache.is_fresh("leaks", TTL));
        let refetched = cache
            .get_or_fetch("leaks", TTL, counting_fetch(&calls, 2))
            .await
            .unwrap();
        assert_eq!(refetched, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_is_chosen_per_call() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("health", TTL, counting_fetch(&calls, 1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        let short = Duration::from_secs(10);
        let value = cache
            .get_or_fetch("health", short, counting_fetch(&calls, 2))
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = cache
            .get_or_fetch("stats", TTL, failing_fetch(&calls))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stats service down"));
        assert!(cache.is_empty());

        let value = cache
            .get_or_fetch("stats", TTL, counting_fetch(&calls, 3))
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_a_failure() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get_or_fetch("stats", TTL, failing_fetch(&calls)),
            cache.get_or_fetch("stats", TTL, counting_fetch(&calls, 4)),
        );

        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_bypasses_fresh_entry() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("stats", TTL, counting_fetch(&calls, 1))
            .await
            .unwrap();
        let refreshed = cache
            .force_refresh("stats", counting_fetch(&calls, 2))
            .await
            .unwrap();

        assert_eq!(refreshed, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.peek("stats").unwrap().data, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_value() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("stats", TTL, counting_fetch(&calls, 1))
            .await
            .unwrap();
        assert!(
            cache
                .force_refresh("stats", failing_fetch(&calls))
                .await
                .is_err()
        );

        let value = cache
            .get_or_fetch("stats", TTL, counting_fetch(&calls, 5))
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_next_read_to_fetch() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("stats", TTL, counting_fetch(&calls, 1))
            .await
            .unwrap();
        cache.invalidate("stats");
        assert_eq!(cache.age("stats"), None);
        assert!(cache.is_empty());

        let value = cache
            .get_or_fetch("stats", TTL, counting_fetch(&calls, 2))
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_detaches_running_fetch() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        let in_flight = cache.get_or_fetch("stats", TTL, counting_fetch(&calls, 1));
        let invalidate_then_read = async {
            tokio::task::yield_now().await;
            cache.invalidate("stats");
            cache
                .get_or_fetch("stats", TTL, counting_fetch(&calls, 2))
                .await
        };
        let (old, new) = tokio::join!(in_flight, invalidate_then_read);

        assert_eq!(old.unwrap(), 1);
        assert_eq!(new.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.peek("stats").unwrap().data, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_oldest_entry() {
        let cache = TtlCache::<u32>::new(TTL, 2);
        let calls = Arc::new(AtomicUsize::new(0));

        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            cache
                .get_or_fetch(key, TTL, counting_fetch(&calls, u32::try_from(i).unwrap()))
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.peek("a").is_none());
        assert!(cache.peek("b").is_some());
        assert!(cache.peek("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_old_entries() {
        let cache = TtlCache::<u32>::new(TTL, 16);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("old", TTL, counting_fetch(&calls, 1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        cache
            .get_or_fetch("new", TTL, counting_fetch(&calls, 2))
            .await
            .unwrap();

        assert_eq!(cache.purge_older_than(Duration::from_secs(60)), 1);
        assert!(cache.peek("old").is_none());
        assert!(cache.peek("new").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
