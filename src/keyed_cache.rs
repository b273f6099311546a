//! Per-key cache whose newest request supersedes any older one.
//!
//! Used for data scoped by a form selection, such as positions by
//! department. A form has one selection, so a new request cancels whatever
//! request is outstanding, for the same key or another one; so does a cache
//! hit for a different key. Cancellation reaches the transport through a
//! [`CancellationToken`], and a cancelled request never writes to the cache:
//! its callers get `Ok(None)` as soon as it is cancelled.

use crate::{
    cache::{is_expired, spawn_shared, SharedFetch},
    error::Result,
    metrics::CacheMetrics,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Remote collaborator that produces the collection for one key.
#[async_trait]
pub trait KeyedSource<K, T>: Send + Sync {
    /// Fetch the collection for `key`. Implementations should abort the
    /// underlying transport when `cancel` fires.
    async fn fetch(&self, key: &K, cancel: CancellationToken) -> Result<T>;
}

#[derive(Debug)]
struct KeyedEntry<T> {
    data: Arc<T>,
    cached_at: Instant,
}

struct ActiveRequest<K> {
    id: u64,
    key: K,
    cancel: CancellationToken,
}

struct KeyedInner<K, T> {
    entries: DashMap<K, KeyedEntry<T>>,
    active: Mutex<Option<ActiveRequest<K>>>,
}

/// Cache of `T` per key `K` with supersede-and-cancel semantics.
///
/// Clones share the same cache.
pub struct KeyedResourceStore<K, T> {
    name: Arc<str>,
    ttl: Duration,
    source: Arc<dyn KeyedSource<K, T>>,
    inner: Arc<KeyedInner<K, T>>,
    next_id: Arc<AtomicU64>,
    metrics: CacheMetrics,
}

impl<K, T> Clone for KeyedResourceStore<K, T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            ttl: self.ttl,
            source: Arc::clone(&self.source),
            inner: Arc::clone(&self.inner),
            next_id: Arc::clone(&self.next_id),
            metrics: self.metrics.clone(),
        }
    }
}

impl<K, T> KeyedResourceStore<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Create a store for `name` backed by `source`.
    pub fn new(name: impl Into<String>, ttl: Duration, source: Arc<dyn KeyedSource<K, T>>) -> Self {
        Self {
            name: Arc::from(name.into()),
            ttl,
            source,
            inner: Arc::new(KeyedInner {
                entries: DashMap::new(),
                active: Mutex::new(None),
            }),
            next_id: Arc::new(AtomicU64::new(1)),
            metrics: CacheMetrics::new(),
        }
    }

    /// Fetch the collection for `key`.
    ///
    /// A fresh cached entry is returned without a request unless `force`.
    /// Otherwise any outstanding request is cancelled and a new one started.
    /// Returns `Ok(None)` if this request is itself superseded before it
    /// settles.
    pub async fn fetch(&self, key: K, force: bool) -> Result<Option<Arc<T>>> {
        if !force {
            if let Some(data) = self.fresh(&key) {
                self.metrics.record_hit();
                log::debug!("Cache hit for '{}' key {:?}", self.name, key);
                let mut active = self.inner.active.lock();
                if active.as_ref().is_some_and(|a| a.key != key) {
                    self.supersede(&mut active, &key);
                }
                return Ok(Some(data));
            }
        }
        self.metrics.record_miss();

        let (request, cancel) = {
            let mut active = self.inner.active.lock();
            self.supersede(&mut active, &key);

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            let request = self.start_request(id, key.clone(), cancel.clone());
            *active = Some(ActiveRequest {
                id,
                key,
                cancel: cancel.clone(),
            });
            (request, cancel)
        };

        tokio::select! {
            biased;
            outcome = request => outcome,
            _ = cancel.cancelled() => Ok(None),
        }
    }

    fn fresh(&self, key: &K) -> Option<Arc<T>> {
        let entry = self.inner.entries.get(key)?;
        (!is_expired(Some(entry.cached_at), self.ttl, Instant::now())).then(|| Arc::clone(&entry.data))
    }

    fn supersede(&self, active: &mut Option<ActiveRequest<K>>, key: &K) {
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            self.metrics.record_cancellation();
            log::debug!(
                "Cancelled request for '{}' key {:?}, superseded by key {:?}",
                self.name,
                previous.key,
                key
            );
        }
    }

    fn start_request(&self, id: u64, key: K, cancel: CancellationToken) -> SharedFetch<Option<Arc<T>>> {
        let name = Arc::clone(&self.name);
        let source = Arc::clone(&self.source);
        let inner: Weak<KeyedInner<K, T>> = Arc::downgrade(&self.inner);
        let metrics = self.metrics.clone();

        metrics.record_transport_call();
        spawn_shared(async move {
            let started = Instant::now();
            let outcome = source.fetch(&key, cancel.clone()).await;
            metrics.record_settled(started.elapsed(), outcome.is_ok());

            let Some(inner) = inner.upgrade() else {
                return Ok(None);
            };
            // Checked and written under the same lock that cancels, so a
            // superseded response can never land after a newer one starts.
            let mut active = inner.active.lock();
            if cancel.is_cancelled() {
                log::debug!("Discarding superseded response for '{}' key {:?}", name, key);
                return Ok(None);
            }
            if active.as_ref().map(|a| a.id) == Some(id) {
                *active = None;
            }

            let data = match outcome {
                Ok(data) => Arc::new(data),
                Err(e) => {
                    log::warn!("Fetching '{}' key {:?} failed: {e}", name, key);
                    return Err(e);
                }
            };
            inner.entries.insert(
                key,
                KeyedEntry {
                    data: Arc::clone(&data),
                    cached_at: Instant::now(),
                },
            );
            drop(active);
            Ok(Some(data))
        })
    }

    /// Cancel the outstanding request, if any.
    pub fn cancel_pending(&self) {
        if let Some(previous) = self.inner.active.lock().take() {
            previous.cancel.cancel();
            self.metrics.record_cancellation();
        }
    }

    /// Drop the cached entry for `key`.
    pub fn invalidate(&self, key: &K) {
        self.inner.entries.remove(key);
        log::debug!("Invalidated '{}' key {:?}", self.name, key);
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.inner.entries.clear();
        log::debug!("Invalidated all keys of '{}'", self.name);
    }

    /// Cancel the outstanding request and drop every cached entry.
    pub fn reset(&self) {
        self.cancel_pending();
        self.invalidate_all();
    }

    /// Cached data for `key` regardless of freshness.
    pub fn cached(&self, key: &K) -> Option<Arc<T>> {
        self.inner.entries.get(key).map(|entry| Arc::clone(&entry.data))
    }

    /// Key of the outstanding request, if any.
    pub fn pending_key(&self) -> Option<K> {
        self.inner.active.lock().as_ref().map(|a| a.key.clone())
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether no key is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Counters for this store.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

impl<K: Eq + Hash, T> fmt::Debug for KeyedResourceStore<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedResourceStore")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("keys", &self.inner.entries.len())
            .finish()
    }
}
