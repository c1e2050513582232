//! At most one in-flight request per cache key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use feed_cache::{CacheStore, Settlement};
use feed_core::{CacheKey, FeedError, Result};

/// Pending result shared by every caller of one key.
pub type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Loads of one key before an overtaken result is given up on.
const MAX_FETCH_ATTEMPTS: u32 = 3;

struct InFlight<V> {
    id: u64,
    fetch: SharedFetch<V>,
}

/// Collapses concurrent loads of the same key into one.
///
/// The load runs on its own task: callers that stop waiting never cancel
/// it, and its outcome is written to the store for whoever asks next. A
/// result overtaken by a write is loaded again, so callers joining late never
/// receive data older than the write they raced with.
pub struct Deduplicator<V> {
    store: Arc<CacheStore<V>>,
    in_flight: Arc<Mutex<HashMap<CacheKey, InFlight<V>>>>,
    next_id: Arc<AtomicU64>,
}

impl<V> Clone for Deduplicator<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            in_flight: self.in_flight.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<V> Deduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a deduplicator writing into `store`.
    pub fn new(store: Arc<CacheStore<V>>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Loads `key` through `loader` unless a load is already pending.
    ///
    /// Every caller that arrives while the load is pending receives the same
    /// value or the same error.
    pub async fn fetch_once<F, Fut>(&self, key: &CacheKey, loader: F) -> Result<V>
    where
        F: Fn(CacheKey) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.start(key, loader).await
    }

    /// Registers the load synchronously and returns the shared pending result.
    ///
    /// Must be called from within a Tokio runtime. `loader` only has to build
    /// the future; its first call happens with the in-flight table locked.
    pub fn start<F, Fut>(&self, key: &CacheKey, loader: F) -> SharedFetch<V>
    where
        F: Fn(CacheKey) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock();
        if let Some(pending) = in_flight.get(key) {
            debug!(%key, "Joining in-flight request");
            return pending.fetch.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut ticket = self.store.begin_fetch(key);
        let mut load = loader(key.clone());

        let store = self.store.clone();
        let table = self.in_flight.clone();
        let owned_key = key.clone();
        debug!(%key, id, "Starting request");

        let task = tokio::spawn(async move {
            let mut attempt = 1;
            let outcome = loop {
                let outcome = load.await;
                if let Err(err) = &outcome {
                    warn!(key = %owned_key, error = %err, "Request failed");
                }
                match store.settle_fetch(&ticket, outcome.clone()) {
                    Settlement::Superseded(renewed) if attempt < MAX_FETCH_ATTEMPTS => {
                        attempt += 1;
                        debug!(key = %owned_key, id, attempt, "Refetching overtaken result");
                        ticket = renewed;
                        load = loader(owned_key.clone());
                    }
                    Settlement::Superseded(renewed) => {
                        warn!(key = %owned_key, id, "Giving up on a repeatedly overtaken request");
                        store.abandon_fetch(&renewed);
                        break outcome;
                    }
                    Settlement::Applied | Settlement::Deferred => break outcome,
                }
            };

            let mut table = table.lock();
            if table.get(&owned_key).is_some_and(|pending| pending.id == id) {
                table.remove(&owned_key);
            }
            outcome
        });

        let fetch = task
            .map(|joined| {
                joined.unwrap_or_else(|err| {
                    Err(FeedError::InternalError(format!("request task failed: {err}")))
                })
            })
            .boxed()
            .shared();

        in_flight.insert(key.clone(), InFlight { id, fetch: fetch.clone() });
        fetch
    }

    /// True if a load of `key` is pending.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Number of pending loads.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}
