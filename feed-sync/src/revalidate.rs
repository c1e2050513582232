//! Refreshing cached keys from the server.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use feed_cache::CacheStore;
use feed_core::{CacheKey, Fetcher, KeyMatch, Result};

use crate::dedup::{Deduplicator, SharedFetch};

/// Refetches keys through the deduplicator and records the outcome.
pub struct Revalidator<V> {
    store: Arc<CacheStore<V>>,
    dedup: Deduplicator<V>,
    fetcher: Arc<dyn Fetcher<V>>,
}

impl<V> Clone for Revalidator<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dedup: self.dedup.clone(),
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<V> Revalidator<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a revalidator loading through `fetcher`.
    pub fn new(
        store: Arc<CacheStore<V>>,
        dedup: Deduplicator<V>,
        fetcher: Arc<dyn Fetcher<V>>,
    ) -> Self {
        Self { store, dedup, fetcher }
    }

    /// Refetches `key` and waits for the outcome.
    ///
    /// Joins a pending fetch of the same key instead of starting another.
    pub async fn revalidate(&self, key: &CacheKey) -> Result<V> {
        self.trigger(key).await
    }

    /// Starts (or joins) a refetch of `key` without waiting for it.
    ///
    /// The validating flag is set before this returns.
    pub fn trigger(&self, key: &CacheKey) -> SharedFetch<V> {
        let fetcher = self.fetcher.clone();
        self.dedup.start(key, move |key| {
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(&key).await }
        })
    }

    /// Schedules a refetch of `key` after `delay`.
    pub fn revalidate_after(&self, key: CacheKey, delay: Duration) {
        let this = self.clone();
        debug!(%key, ?delay, "Scheduling revalidation");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = this.revalidate(&key).await {
                warn!(%key, error = %err, "Scheduled revalidation failed");
            }
        });
    }

    /// Marks matching keys stale and refetches those someone is watching.
    ///
    /// Keys without subscribers are refetched on their next subscription.
    /// A fetch already in flight for a watched key is joined but its result
    /// is discarded and loaded again. Returns the keys that were refetched.
    #[instrument(skip(self))]
    pub fn invalidate(&self, matcher: &KeyMatch) -> Vec<CacheKey> {
        let watched: Vec<CacheKey> = self
            .store
            .invalidate(matcher)
            .into_iter()
            .filter(|key| self.store.subscriber_count(key) > 0)
            .collect();
        for key in &watched {
            drop(self.trigger(key));
        }
        debug!(refetched = watched.len(), "Invalidation done");
        watched
    }

    /// The store this revalidator writes into.
    pub fn store(&self) -> &Arc<CacheStore<V>> {
        &self.store
    }
}
