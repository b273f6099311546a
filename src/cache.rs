//! Fetch-and-cache store for one resource collection.
//!
//! [`CachedResourceStore`] guarantees at most one in-flight transport call at
//! a time. Callers arriving while a call is outstanding share its future and
//! observe the same result, success or failure. Results are cached with a
//! TTL; [`invalidate`](CachedResourceStore::invalidate) discards cached data
//! but never an in-flight call. [`reset`](CachedResourceStore::reset) also
//! detaches the in-flight call so its result is never stored.

use crate::{
    error::{Error, Result},
    metrics::CacheMetrics,
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::time::Instant;

/// Remote collaborator that produces one resource collection.
#[async_trait]
pub trait ResourceSource<T>: Send + Sync {
    /// Fetch the full collection.
    async fn fetch(&self) -> Result<T>;
}

/// `cached_at` is `None` or at least `ttl` old.
pub fn is_expired(cached_at: Option<Instant>, ttl: Duration, now: Instant) -> bool {
    match cached_at {
        None => true,
        Some(at) => now.saturating_duration_since(at) >= ttl,
    }
}

pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Run `request` on its own task and share its outcome.
///
/// The task settles even if every caller stops waiting, so the slot holding
/// the shared future is always released.
pub(crate) fn spawn_shared<T, F>(request: F) -> SharedFetch<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let task = tokio::spawn(request);
    async move {
        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::transport(format!("request task failed: {e}"))),
        }
    }
    .boxed()
    .shared()
}

struct StoreState<T> {
    data: Option<Arc<T>>,
    cached_at: Option<Instant>,
    in_flight: Option<SharedFetch<Arc<T>>>,
    /// Bumped by `reset`; requests started under an older value never write.
    generation: u64,
}

impl<T> Default for StoreState<T> {
    fn default() -> Self {
        Self {
            data: None,
            cached_at: None,
            in_flight: None,
            generation: 0,
        }
    }
}

/// A cached, deduplicated view of one remote resource.
///
/// Clones share the same cache.
pub struct CachedResourceStore<T> {
    name: Arc<str>,
    ttl: Duration,
    source: Arc<dyn ResourceSource<T>>,
    state: Arc<Mutex<StoreState<T>>>,
    metrics: CacheMetrics,
}

impl<T> Clone for CachedResourceStore<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            ttl: self.ttl,
            source: Arc::clone(&self.source),
            state: Arc::clone(&self.state),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T> CachedResourceStore<T>
where
    T: Send + Sync + 'static,
{
    /// Create a store for `name` backed by `source`.
    pub fn new(name: impl Into<String>, ttl: Duration, source: Arc<dyn ResourceSource<T>>) -> Self {
        Self {
            name: Arc::from(name.into()),
            ttl,
            source,
            state: Arc::new(Mutex::new(StoreState::default())),
            metrics: CacheMetrics::new(),
        }
    }

    /// Fetch the resource.
    ///
    /// Returns cached data when it is fresh and `force` is false. Otherwise
    /// joins the in-flight request if there is one, or starts a new one.
    /// Errors propagate to every caller sharing the request and leave any
    /// previously cached data untouched.
    pub async fn fetch(&self, force: bool) -> Result<Arc<T>> {
        let request = {
            let mut state = self.state.lock();

            if !force && !is_expired(state.cached_at, self.ttl, Instant::now()) {
                if let Some(data) = &state.data {
                    self.metrics.record_hit();
                    log::debug!("Cache hit for '{}'", self.name);
                    return Ok(Arc::clone(data));
                }
            }

            self.metrics.record_miss();
            match &state.in_flight {
                Some(in_flight) => {
                    self.metrics.record_dedup_join();
                    log::debug!("Joining in-flight request for '{}'", self.name);
                    in_flight.clone()
                }
                None => {
                    log::debug!(
                        "Cache miss for '{}' (force: {force}), starting request",
                        self.name
                    );
                    let request = self.start_request(state.generation);
                    state.in_flight = Some(request.clone());
                    request
                }
            }
        };

        request.await
    }

    fn start_request(&self, generation: u64) -> SharedFetch<Arc<T>> {
        let name = Arc::clone(&self.name);
        let source = Arc::clone(&self.source);
        let state: Weak<Mutex<StoreState<T>>> = Arc::downgrade(&self.state);
        let metrics = self.metrics.clone();

        metrics.record_transport_call();
        spawn_shared(async move {
            let started = Instant::now();
            let outcome = source.fetch().await.map(Arc::new);
            metrics.record_settled(started.elapsed(), outcome.is_ok());

            let Some(state) = state.upgrade() else {
                return outcome;
            };
            let mut state = state.lock();
            if state.generation != generation {
                log::debug!("Dropping result for '{}' fetched before a reset", name);
                return outcome;
            }
            // Cleared on every outcome so a failure never wedges the slot.
            state.in_flight = None;
            match &outcome {
                Ok(data) => {
                    state.data = Some(Arc::clone(data));
                    state.cached_at = Some(Instant::now());
                    log::debug!("Cached '{}'", name);
                }
                Err(e) => log::warn!("Fetching '{}' failed: {e}", name),
            }
            outcome
        })
    }

    /// Discard cached data. An in-flight request is left to complete and
    /// will repopulate the cache.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.data = None;
        state.cached_at = None;
        log::debug!("Invalidated '{}'", self.name);
    }

    /// Discard cached data and detach the in-flight request.
    ///
    /// Callers already waiting on the detached request still get its outcome,
    /// but it is never stored. The next fetch starts a new request.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.data = None;
        state.cached_at = None;
        state.in_flight = None;
        log::debug!("Reset '{}'", self.name);
    }

    /// Cached data regardless of freshness.
    pub fn cached(&self) -> Option<Arc<T>> {
        self.state.lock().data.clone()
    }

    /// Whether data has been loaded and not invalidated since.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().data.is_some()
    }

    /// Whether a request is in flight.
    pub fn is_loading(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    /// Whether the cached data is missing or older than the TTL.
    pub fn is_stale(&self) -> bool {
        let state = self.state.lock();
        state.data.is_none() || is_expired(state.cached_at, self.ttl, Instant::now())
    }

    /// When the cached data was stored.
    pub fn cached_at(&self) -> Option<Instant> {
        self.state.lock().cached_at
    }

    /// The store's TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counters for this store.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

impl<T> fmt::Debug for CachedResourceStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CachedResourceStore")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("loaded", &state.data.is_some())
            .field("loading", &state.in_flight.is_some())
            .field("cached_at", &state.cached_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Source that counts calls and, when gated, holds each call until a
    /// permit is released.
    struct GatedSource {
        calls: AtomicUsize,
        gate: Option<Semaphore>,
        fail_first: bool,
    }

    impl GatedSource {
        fn immediate() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: None,
                fail_first: false,
            })
        }

        fn gated(fail_first: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Some(Semaphore::new(0)),
                fail_first,
            })
        }

        fn release(&self, calls: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(calls);
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceSource<Vec<u32>> for GatedSource {
        async fn fetch(&self) -> Result<Vec<u32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            if self.fail_first && call == 1 {
                return Err(Error::transport("boom"));
            }
            Ok(vec![call as u32])
        }
    }

    fn store_with(name: &str, ttl: Duration, source: &Arc<GatedSource>) -> CachedResourceStore<Vec<u32>> {
        CachedResourceStore::new(name, ttl, Arc::clone(source) as Arc<dyn ResourceSource<Vec<u32>>>)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_freshness() {
        let source = GatedSource::immediate();
        let store = store_with("departments", Duration::from_millis(1000), &source);

        assert_eq!(*store.fetch(false).await.unwrap(), vec![1]);
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(*store.fetch(false).await.unwrap(), vec![1]);
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(store.is_stale());
        assert_eq!(*store.fetch(false).await.unwrap(), vec![2]);
        assert_eq!(source.calls(), 2);
        assert_eq!(store.metrics().snapshot().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary_is_inclusive() {
        let source = GatedSource::immediate();
        let store = store_with("positions", Duration::from_millis(1000), &source);

        store.fetch(false).await.unwrap();
        tokio::time::advance(Duration::from_millis(1000)).await;
        store.fetch(false).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_force_bypasses_fresh_cache() {
        let source = GatedSource::immediate();
        let store = store_with("employees", Duration::from_secs(60), &source);

        store.fetch(false).await.unwrap();
        assert_eq!(*store.fetch(true).await.unwrap(), vec![2]);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let source = GatedSource::gated(false);
        let store = store_with("employees", Duration::from_secs(60), &source);

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(false).await }
        });
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(true).await }
        });

        while store.metrics().snapshot().dedup_joins < 1 {
            tokio::task::yield_now().await;
        }
        source.release(1);

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.calls(), 1);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_failure_propagates_and_clears_slot() {
        let source = GatedSource::gated(true);
        let store = store_with("work_locations", Duration::from_secs(60), &source);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.fetch(false).await })
            })
            .collect();
        while store.metrics().snapshot().dedup_joins < 2 {
            tokio::task::yield_now().await;
        }
        source.release(1);

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap_err(), Error::transport("boom"));
        }
        assert_eq!(source.calls(), 1);
        assert!(!store.is_loading());
        assert!(!store.is_loaded());
        assert_eq!(store.metrics().snapshot().failures, 1);

        // The slot is free again, so the next fetch retries.
        source.release(1);
        assert_eq!(*store.fetch(false).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_data() {
        let source = GatedSource::immediate();
        let store = store_with("grants", Duration::from_secs(60), &source);
        store.fetch(false).await.unwrap();

        struct Failing;
        #[async_trait]
        impl ResourceSource<Vec<u32>> for Failing {
            async fn fetch(&self) -> Result<Vec<u32>> {
                Err(Error::transport("down"))
            }
        }
        let failing = CachedResourceStore {
            source: Arc::new(Failing),
            ..store.clone()
        };
        assert!(failing.fetch(true).await.is_err());
        assert_eq!(store.cached().as_deref(), Some(&vec![1]));
        assert!(store.is_loaded());
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let source = GatedSource::immediate();
        let store = store_with("departments", Duration::from_secs(60), &source);

        store.fetch(false).await.unwrap();
        store.invalidate();
        store.invalidate();
        assert!(!store.is_loaded());
        assert!(store.cached_at().is_none());

        store.fetch(false).await.unwrap();
        store.fetch(false).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_does_not_cancel_in_flight() {
        let source = GatedSource::gated(false);
        let store = store_with("employees", Duration::from_secs(60), &source);

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(false).await }
        });
        while !store.is_loading() {
            tokio::task::yield_now().await;
        }
        store.invalidate();
        source.release(1);

        assert_eq!(*pending.await.unwrap().unwrap(), vec![1]);
        assert!(store.is_loaded(), "completed request repopulates the cache");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_result() {
        let source = GatedSource::gated(false);
        let store = store_with("employees", Duration::from_secs(60), &source);
        source.release(1);
        store.fetch(false).await.unwrap();

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.fetch(true).await }
        });
        while source.calls() < 2 {
            tokio::task::yield_now().await;
        }
        store.reset();
        assert!(!store.is_loaded());
        assert!(!store.is_loading());
        source.release(1);

        assert_eq!(*pending.await.unwrap().unwrap(), vec![2]);
        assert!(!store.is_loaded(), "result from before the reset is not stored");

        source.release(1);
        assert_eq!(*store.fetch(false).await.unwrap(), vec![3]);
        assert!(store.is_loaded());
    }

    #[tokio::test]
    async fn test_abandoned_request_still_settles() {
        let source = GatedSource::gated(false);
        let store = store_with("departments", Duration::from_secs(60), &source);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), store.fetch(false)).await;
        assert!(abandoned.is_err());
        assert!(store.is_loading());

        source.release(1);
        while store.is_loading() {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.cached().as_deref(), Some(&vec![1]));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_is_expired() {
        let now = Instant::now();
        assert!(is_expired(None, Duration::from_secs(1), now));
        assert!(!is_expired(Some(now), Duration::from_secs(1), now));
    }
}
