//! Read-through cache with stale-while-revalidate and single-flight fetches.
//!
//! Each key is in one of three states when read:
//! - fresh: served from memory, no upstream call
//! - stale: served from memory while one background refresh runs
//! - missing: callers share a single upstream fetch and its outcome
//!
//! Every fetch owns an in-flight slot tagged with a unique id. A fetch only
//! writes its result if its slot is still the current one for the key when
//! it finishes. [`SwrCache::invalidate`], [`SwrCache::write`] and
//! [`SwrCache::clear`] drop the slot, so a fetch that started before a
//! mutation can still answer its waiters but never overwrites newer state.

mod config;

pub use config::CacheConfig;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry as SlotEntry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Result of a plain [`SwrCache::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<V> {
    Fresh(V),
    Stale(V),
    Miss,
}

impl<V> CacheLookup<V> {
    pub fn value(self) -> Option<V> {
        match self {
            CacheLookup::Fresh(v) | CacheLookup::Stale(v) => Some(v),
            CacheLookup::Miss => None,
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    fresh_until: Instant,
    stale_until: Instant,
}

type SharedFetch<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

struct InFlight<V, E> {
    id: u64,
    fetch: SharedFetch<V, E>,
}

struct Inner<V, E> {
    config: CacheConfig,
    /// Insertion-ordered, so index 0 is always the oldest entry.
    entries: Mutex<IndexMap<String, CacheEntry<V>>>,
    in_flight: DashMap<String, InFlight<V, E>>,
    next_fetch_id: AtomicU64,
}

/// Stale-while-revalidate cache keyed by string.
///
/// Cloning is cheap and shares state. Lock order is always the entry map
/// before an in-flight shard.
pub struct SwrCache<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for SwrCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> fmt::Debug for SwrCache<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwrCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.entries.lock().len())
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

impl<V, E> SwrCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: Mutex::new(IndexMap::new()),
                in_flight: DashMap::new(),
                next_fetch_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Serve `key` from memory, refreshing through `fetcher` as needed.
    ///
    /// `fetcher` is only invoked when this call leads a new fetch. Once
    /// started, a fetch runs to completion on its own task even if every
    /// caller stops waiting.
    pub async fn read_through<F, Fut>(&self, key: &str, fetcher: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        match self.read(key) {
            CacheLookup::Fresh(value) => {
                trace!(key, "Cache hit (fresh)");
                Ok(value)
            }
            CacheLookup::Stale(value) => {
                let (fetch, leader) = self.join_or_lead(key, fetcher);
                if leader {
                    debug!(key, "Serving stale entry, refreshing in background");
                    self.drive(key, fetch);
                }
                Ok(value)
            }
            CacheLookup::Miss => {
                let (fetch, leader) = self.join_or_lead(key, fetcher);
                if leader {
                    debug!(key, "Cache miss, fetching");
                    self.drive(key, fetch.clone());
                } else {
                    trace!(key, "Joining in-flight fetch");
                }
                fetch.await
            }
        }
    }

    /// Classify `key` without fetching. Expired entries are deleted.
    pub fn read(&self, key: &str) -> CacheLookup<V> {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get(key) else {
            return CacheLookup::Miss;
        };

        let now = Instant::now();
        if now <= entry.fresh_until {
            CacheLookup::Fresh(entry.value.clone())
        } else if now <= entry.stale_until {
            CacheLookup::Stale(entry.value.clone())
        } else {
            entries.shift_remove(key);
            CacheLookup::Miss
        }
    }

    /// Store `value` as fresh. Any fetch already running for `key` will not
    /// overwrite it.
    pub fn write(&self, key: &str, value: V) {
        let mut entries = self.inner.entries.lock();
        self.inner.in_flight.remove(key);
        self.inner.insert_locked(&mut entries, key, value);
    }

    /// Drop the entry and the in-flight slot for `key`.
    pub fn invalidate(&self, key: &str) {
        let mut entries = self.inner.entries.lock();
        self.inner.in_flight.remove(key);
        entries.shift_remove(key);
    }

    pub fn clear(&self) {
        let mut entries = self.inner.entries.lock();
        self.inner.in_flight.clear();
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.lock().keys().cloned().collect()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.in_flight.contains_key(key)
    }

    /// Return the running fetch for `key`, or start one. The flag is true
    /// when this call started it.
    fn join_or_lead<F, Fut>(&self, key: &str, fetcher: F) -> (SharedFetch<V, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        match self.inner.in_flight.entry(key.to_string()) {
            SlotEntry::Occupied(slot) => (slot.get().fetch.clone(), false),
            SlotEntry::Vacant(slot) => {
                let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let inner = Arc::clone(&self.inner);
                let owned_key = key.to_string();
                let upstream = fetcher();

                let fetch = async move {
                    let result = upstream.await;
                    inner.complete(&owned_key, id, result.as_ref().ok());
                    result.map_err(Arc::new)
                }
                .boxed()
                .shared();

                slot.insert(InFlight {
                    id,
                    fetch: fetch.clone(),
                });
                (fetch, true)
            }
        }
    }

    fn drive(&self, key: &str, fetch: SharedFetch<V, E>) {
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(err) = fetch.await {
                debug!(key = %key, error = %err, "Cache fetch failed");
            }
        });
    }
}

impl<V: Clone, E> Inner<V, E> {
    /// Release the slot for fetch `id` and store its value if the slot was
    /// still current.
    fn complete(&self, key: &str, id: u64, value: Option<&V>) {
        let mut entries = self.entries.lock();
        let current = self
            .in_flight
            .remove_if(key, |_, slot| slot.id == id)
            .is_some();

        match value {
            Some(value) if current => self.insert_locked(&mut entries, key, value.clone()),
            Some(_) => debug!(key, "Discarding result of superseded fetch"),
            None => {}
        }
    }

    fn insert_locked(&self, entries: &mut IndexMap<String, CacheEntry<V>>, key: &str, value: V) {
        let fresh_until = Instant::now() + self.config.ttl;
        let entry = CacheEntry {
            value,
            fresh_until,
            stale_until: fresh_until + self.config.stale_while_revalidate,
        };

        // An existing key keeps its insertion slot.
        entries.insert(key.to_string(), entry);

        while entries.len() > self.config.max_entries {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                trace!(key = %evicted, "Pruned oldest cache entry");
            }
        }
    }
}
