//! Entry point tying the store, deduplicator, revalidator, and mutator together.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use feed_cache::{CacheEntry, CacheStats, CacheStore, Subscription};
use feed_core::{CacheKey, Fetcher, KeyMatch, Result, DEFAULT_REVALIDATE_DELAY};

use crate::dedup::Deduplicator;
use crate::mutate::{MutateOptions, MutationHandle, OptimisticMutator};
use crate::revalidate::Revalidator;

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fetch unfetched or stale keys when someone subscribes to them
    pub revalidate_on_subscribe: bool,
    /// Delay before reconciling a confirmed mutation with the server
    pub revalidate_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            revalidate_on_subscribe: true,
            revalidate_delay: DEFAULT_REVALIDATE_DELAY,
        }
    }
}

impl EngineConfig {
    /// Sets the post-mutation revalidation delay.
    pub fn with_revalidate_delay(mut self, delay: Duration) -> Self {
        self.revalidate_delay = delay;
        self
    }

    /// Disables fetching on subscribe.
    pub fn lazy(mut self) -> Self {
        self.revalidate_on_subscribe = false;
        self
    }
}

/// Client-side synchronization engine over one value type.
///
/// Cloning is cheap; clones share the same store and in-flight state.
pub struct SyncEngine<V> {
    store: Arc<CacheStore<V>>,
    dedup: Deduplicator<V>,
    revalidator: Revalidator<V>,
    mutator: OptimisticMutator<V>,
    config: EngineConfig,
}

impl<V> Clone for SyncEngine<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dedup: self.dedup.clone(),
            revalidator: self.revalidator.clone(),
            mutator: self.mutator.clone(),
            config: self.config.clone(),
        }
    }
}

impl<V> SyncEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an engine loading through `fetcher`.
    pub fn new(fetcher: Arc<dyn Fetcher<V>>, config: EngineConfig) -> Self {
        let store = Arc::new(CacheStore::new());
        let dedup = Deduplicator::new(store.clone());
        let revalidator = Revalidator::new(store.clone(), dedup.clone(), fetcher);
        let mutator = OptimisticMutator::new(revalidator.clone());
        Self {
            store,
            dedup,
            revalidator,
            mutator,
            config,
        }
    }

    /// Current entry for `key`.
    pub fn get(&self, key: &CacheKey) -> CacheEntry<V> {
        self.store.get(key)
    }

    /// Writes an outcome directly into the store.
    pub fn set(&self, key: &CacheKey, outcome: Result<V>) {
        self.store.set(key, outcome);
    }

    /// Registers `callback` for changes to `key`.
    ///
    /// If the entry was never fetched or was invalidated, a fetch starts
    /// (or an in-flight one is joined). Must be called from within a Tokio
    /// runtime.
    pub fn subscribe<F>(&self, key: &CacheKey, callback: F) -> Subscription
    where
        F: Fn(&CacheEntry<V>) + Send + Sync + 'static,
    {
        let subscription = self.store.subscribe(key, Arc::new(callback));
        if self.config.revalidate_on_subscribe && self.store.get(key).needs_revalidation() {
            debug!(%key, "Subscriber triggered fetch");
            drop(self.revalidator.trigger(key));
        }
        subscription
    }

    /// Removes a subscription. A fetch it triggered keeps running.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.store.unsubscribe(subscription)
    }

    /// Loads `key` through a custom loader, deduplicated with every other load.
    ///
    /// `loader` may be called again if its result is overtaken by a write.
    pub async fn fetch_once<F, Fut>(&self, key: &CacheKey, loader: F) -> Result<V>
    where
        F: Fn(CacheKey) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.dedup.fetch_once(key, loader).await
    }

    /// Refetches `key` from the server.
    #[instrument(skip(self))]
    pub async fn revalidate(&self, key: &CacheKey) -> Result<V> {
        self.revalidator.revalidate(key).await
    }

    /// Returns the cached value, fetching it first if missing or stale.
    pub async fn load(&self, key: &CacheKey) -> Result<V> {
        let entry = self.store.get(key);
        match entry.value {
            Some(value) if !entry.stale => Ok(value),
            _ => self.revalidate(key).await,
        }
    }

    /// Marks matching keys stale and refetches the watched ones.
    pub fn invalidate(&self, matcher: impl Into<KeyMatch>) -> Vec<CacheKey> {
        self.revalidator.invalidate(&matcher.into())
    }

    /// Applies `updater` optimistically and runs `remote`, rolling back on failure.
    pub fn mutate<U, F, Fut, R>(
        &self,
        key: &CacheKey,
        updater: U,
        remote: F,
        options: MutateOptions,
    ) -> MutationHandle<R>
    where
        U: Fn(Option<&V>) -> Option<V> + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        self.mutator.mutate(key, updater, remote, options)
    }

    /// Options that reconcile the mutated key after the configured delay.
    pub fn reconcile(&self) -> MutateOptions {
        MutateOptions::new().revalidate_after(self.config.revalidate_delay)
    }

    /// Number of unsettled mutations of `key`.
    pub fn pending_mutations(&self, key: &CacheKey) -> usize {
        self.mutator.pending(key)
    }

    /// True if a fetch of `key` is in flight.
    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.dedup.is_in_flight(key)
    }

    /// Store statistics.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<CacheStore<V>> {
        &self.store
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<V> fmt::Debug for SyncEngine<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use feed_core::FeedError;
    use parking_lot::Mutex;

    /// Serves per-key lists after a short delay and counts calls per key.
    #[derive(Default)]
    struct FakeServer {
        data: Mutex<HashMap<String, Vec<i64>>>,
        calls: Mutex<HashMap<String, usize>>,
        failing: AtomicUsize,
    }

    impl FakeServer {
        fn with(entries: &[(&str, Vec<i64>)]) -> Arc<Self> {
            let server = Self::default();
            for (key, list) in entries {
                server.data.lock().insert(key.to_string(), list.clone());
            }
            Arc::new(server)
        }

        fn calls(&self, key: &str) -> usize {
            self.calls.lock().get(key).copied().unwrap_or(0)
        }

        fn put(&self, key: &str, list: Vec<i64>) {
            self.data.lock().insert(key.to_string(), list);
        }
    }

    #[async_trait]
    impl Fetcher<Vec<i64>> for FakeServer {
        async fn fetch(&self, key: &CacheKey) -> Result<Vec<i64>> {
            *self.calls.lock().entry(key.to_string()).or_default() += 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.failing.load(Ordering::SeqCst) > 0 {
                return Err(FeedError::bad_status(503, "unavailable"));
            }
            Ok(self.data.lock().get(key.as_str()).cloned().unwrap_or_default())
        }
    }

    type Log = Arc<Mutex<Vec<Option<Vec<i64>>>>>;

    fn recorder() -> (Log, impl Fn(&CacheEntry<Vec<i64>>) + Send + Sync + 'static) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |entry: &CacheEntry<Vec<i64>>| sink.lock().push(entry.value.clone()))
    }

    fn engine(server: &Arc<FakeServer>) -> SyncEngine<Vec<i64>> {
        SyncEngine::new(server.clone(), EngineConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_subscribers_share_one_fetch() {
        let server = FakeServer::with(&[("items:1w", vec![1, 2])]);
        let engine = engine(&server);
        let key = CacheKey::from("items:1w");

        let (first, callback) = recorder();
        engine.subscribe(&key, callback);
        assert!(engine.get(&key).is_validating);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let (second, callback) = recorder();
        engine.subscribe(&key, callback);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.calls("items:1w"), 1);
        assert_eq!(*first.lock(), vec![Some(vec![1, 2])]);
        assert_eq!(*second.lock(), vec![Some(vec![1, 2])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_to_fresh_entry_does_not_fetch() {
        let server = FakeServer::with(&[("tags", vec![1])]);
        let engine = engine(&server);
        let key = CacheKey::from("tags");
        engine.revalidate(&key).await.unwrap();

        let (_, callback) = recorder();
        engine.subscribe(&key, callback);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.calls("tags"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_are_independent() {
        let server = FakeServer::with(&[("items:1w", vec![1, 2, 3]), ("items:1d", vec![3])]);
        let engine = engine(&server);
        let week = CacheKey::from("items:1w");
        let day = CacheKey::from("items:1d");

        let (_, callback) = recorder();
        let subscription = engine.subscribe(&week, callback);
        tokio::time::sleep(Duration::from_millis(100)).await;

        engine.unsubscribe(&subscription);
        let (seen, callback) = recorder();
        engine.subscribe(&day, callback);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.get(&week).value, Some(vec![1, 2, 3]));
        assert_eq!(engine.get(&day).value, Some(vec![3]));
        assert_eq!(*seen.lock(), vec![Some(vec![3])]);
        assert_eq!(server.calls("items:1w"), 1);
        assert_eq!(server.calls("items:1d"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_delivers_exactly_one_notification() {
        let server = FakeServer::with(&[("sources", vec![1])]);
        let engine = engine(&server);
        let key = CacheKey::from("sources");

        let (seen, callback) = recorder();
        engine.subscribe(&key, callback);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock(), vec![Some(vec![1])]);

        server.put("sources", vec![1, 2]);
        let refetched = engine.invalidate(key.clone());
        assert_eq!(refetched, vec![key.clone()]);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*seen.lock(), vec![Some(vec![1]), Some(vec![1, 2])]);
        assert_eq!(server.calls("sources"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_key_refetched_on_next_subscribe() {
        let server = FakeServer::with(&[("tags", vec![1])]);
        let engine = engine(&server);
        let key = CacheKey::from("tags");
        engine.revalidate(&key).await.unwrap();

        assert!(engine.invalidate(KeyMatch::All).is_empty());
        assert_eq!(server.calls("tags"), 1);

        let (_, callback) = recorder();
        engine.subscribe(&key, callback);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.calls("tags"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_does_not_cancel_fetch() {
        let server = FakeServer::with(&[("tags", vec![4])]);
        let engine = engine(&server);
        let key = CacheKey::from("tags");

        let (seen, callback) = recorder();
        let subscription = engine.subscribe(&key, callback);
        assert!(engine.unsubscribe(&subscription));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(seen.lock().is_empty());
        assert_eq!(engine.get(&key).value, Some(vec![4]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_keeps_stale_value() {
        let server = FakeServer::with(&[("tags", vec![1])]);
        let engine = engine(&server);
        let key = CacheKey::from("tags");
        engine.revalidate(&key).await.unwrap();

        server.failing.store(1, Ordering::SeqCst);
        let err = engine.revalidate(&key).await.unwrap_err();
        assert!(err.is_recoverable());

        let entry = engine.get(&key);
        assert_eq!(entry.value, Some(vec![1]));
        assert_eq!(entry.error, Some(err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_uses_cache_until_stale() {
        let server = FakeServer::with(&[("sources", vec![5])]);
        let engine = engine(&server);
        let key = CacheKey::from("sources");

        assert_eq!(engine.load(&key).await.unwrap(), vec![5]);
        assert_eq!(engine.load(&key).await.unwrap(), vec![5]);
        assert_eq!(server.calls("sources"), 1);

        engine.invalidate(key.clone());
        assert_eq!(engine.load(&key).await.unwrap(), vec![5]);
        assert_eq!(server.calls("sources"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_done_then_reconcile() {
        let server = FakeServer::with(&[("items:1w", vec![41, 42, 43])]);
        let engine = engine(&server);
        let key = CacheKey::from("items:1w");
        let (seen, callback) = recorder();
        engine.subscribe(&key, callback);
        tokio::time::sleep(Duration::from_millis(100)).await;

        server.put("items:1w", vec![41, 43]);
        let handle = engine.mutate(
            &key,
            |items: Option<&Vec<i64>>| {
                items.map(|list| list.iter().copied().filter(|&id| id != 42).collect())
            },
            || async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(())
            },
            engine.reconcile(),
        );
        assert_eq!(engine.get(&key).value, Some(vec![41, 43]));
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(server.calls("items:1w"), 2);
        assert_eq!(
            *seen.lock(),
            vec![Some(vec![41, 42, 43]), Some(vec![41, 43]), Some(vec![41, 43])]
        );
        assert_eq!(engine.pending_mutations(&key), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_after_write_refreshes_past_inflight_fetch() {
        let server = FakeServer::with(&[("sources", vec![1, 2])]);
        let engine = engine(&server);
        let key = CacheKey::from("sources");
        let (seen, callback) = recorder();
        engine.subscribe(&key, callback);

        tokio::time::sleep(Duration::from_millis(10)).await;
        engine
            .mutate(
                &key,
                |_: Option<&Vec<i64>>| None,
                || async { Ok(()) },
                MutateOptions::new().invalidate(key.clone()),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*seen.lock(), vec![Some(vec![1, 2])]);
        let entry = engine.get(&key);
        assert_eq!(entry.value, Some(vec![1, 2]));
        assert!(!entry.stale);
        assert!(!entry.is_validating);
        assert_eq!(server.calls("sources"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_survives_failed_mutation() {
        let server = FakeServer::with(&[("items:1w", vec![3, 4])]);
        let engine = engine(&server);
        let key = CacheKey::from("items:1w");
        let (seen, callback) = recorder();
        engine.subscribe(&key, callback);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = engine
            .mutate(
                &key,
                |_: Option<&Vec<i64>>| None,
                || async { Err::<(), _>(FeedError::bad_status(500, "nope")) },
                MutateOptions::new(),
            )
            .await;
        assert!(result.is_err());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*seen.lock(), vec![Some(vec![3, 4])]);
        assert_eq!(engine.get(&key).value, Some(vec![3, 4]));
        assert_eq!(server.calls("items:1w"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_held_back_by_slow_mutation_is_refetched() {
        let server = FakeServer::with(&[("tags", vec![7])]);
        let engine = engine(&server);
        let key = CacheKey::from("tags");
        let (seen, callback) = recorder();
        engine.subscribe(&key, callback);

        let handle = engine.mutate(
            &key,
            |_: Option<&Vec<i64>>| None,
            || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            },
            MutateOptions::new(),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(seen.lock().is_empty());
        assert!(engine.get(&key).stale);

        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock(), vec![Some(vec![7])]);
        assert_eq!(server.calls("tags"), 2);
        assert_eq!(engine.pending_mutations(&key), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats() {
        let server = FakeServer::with(&[("tags", vec![1])]);
        let engine = engine(&server);
        let (_, callback) = recorder();
        engine.subscribe(&CacheKey::from("tags"), callback);
        assert_eq!(engine.stats().validating, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = engine.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.with_value, 1);
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.validating, 0);
    }
}
