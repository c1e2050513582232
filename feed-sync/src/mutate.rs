//! Optimistic mutations with rollback.
//!
//! A mutation applies a predicted value to the store immediately, runs the
//! remote operation, and on failure restores the value it would have had
//! without this mutation. Remote operations for one key run one at a time
//! in call order.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use feed_cache::CacheStore;
use feed_core::{CacheKey, FeedError, KeyMatch, Result};

use crate::revalidate::Revalidator;

/// Pure function from the current value to the predicted one.
///
/// Returning `None` leaves the cached value untouched.
pub type Updater<V> = Arc<dyn Fn(Option<&V>) -> Option<V> + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// What to do after a mutation is confirmed by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutateOptions {
    /// Refetch the mutated key after this delay
    pub revalidate_after: Option<Duration>,
    /// Other keys to invalidate on success
    pub invalidate: Vec<KeyMatch>,
}

impl MutateOptions {
    /// Keep the optimistic value as final.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles the mutated key with the server after `delay`.
    pub fn revalidate_after(mut self, delay: Duration) -> Self {
        self.revalidate_after = Some(delay);
        self
    }

    /// Invalidates `matcher` once the mutation succeeds.
    pub fn invalidate(mut self, matcher: impl Into<KeyMatch>) -> Self {
        self.invalidate.push(matcher.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PER-KEY STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Value of the key before its oldest pending mutation.
struct OptimisticPatch<V> {
    snapshot: Option<V>,
}

struct PendingMutation<V> {
    id: u64,
    updater: Updater<V>,
    /// Whether the updater changed the cached value when applied
    predicted: bool,
}

struct MutationQueue<V> {
    patch: OptimisticPatch<V>,
    pending: Vec<PendingMutation<V>>,
    /// Completion signal of the most recently queued remote operation
    tail: Option<oneshot::Receiver<()>>,
}

impl<V: Clone> MutationQueue<V> {
    fn new() -> Self {
        Self {
            patch: OptimisticPatch { snapshot: None },
            pending: Vec::new(),
            tail: None,
        }
    }

    /// Folds the pending updaters over the snapshot.
    fn replay(&self) -> Option<V> {
        self.pending
            .iter()
            .fold(self.patch.snapshot.clone(), |acc, m| apply(&m.updater, acc))
    }

    fn take(&mut self, id: u64) -> Option<PendingMutation<V>> {
        let index = self.pending.iter().position(|m| m.id == id)?;
        Some(self.pending.remove(index))
    }
}

fn apply<V>(updater: &Updater<V>, current: Option<V>) -> Option<V> {
    updater(current.as_ref()).or(current)
}

/// Serializes local state changes for one key.
///
/// Reentrant so that a subscriber notified of an optimistic write may itself
/// start a mutation of the same key. Always locked inside
/// [`CacheStore::exclusive`] when the store is written under it.
struct Lane<V> {
    queue: ReentrantMutex<RefCell<MutationQueue<V>>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Completion of a mutation's remote operation.
///
/// Dropping the handle does not cancel the mutation.
pub struct MutationHandle<R> {
    key: CacheKey,
    task: JoinHandle<Result<R>>,
}

impl<R> MutationHandle<R> {
    /// Key the mutation targets.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl<R> Future for MutationHandle<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| {
                Err(FeedError::InternalError(format!("mutation task failed: {err}")))
            })
        })
    }
}

impl<R> fmt::Debug for MutationHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHandle").field("key", &self.key).finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MUTATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Applies local predictions and reconciles them with the server.
pub struct OptimisticMutator<V> {
    store: Arc<CacheStore<V>>,
    revalidator: Revalidator<V>,
    lanes: Arc<DashMap<CacheKey, Arc<Lane<V>>>>,
    next_id: Arc<AtomicU64>,
}

impl<V> Clone for OptimisticMutator<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            revalidator: self.revalidator.clone(),
            lanes: self.lanes.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<V> OptimisticMutator<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a mutator over the revalidator's store.
    pub fn new(revalidator: Revalidator<V>) -> Self {
        Self {
            store: revalidator.store().clone(),
            revalidator,
            lanes: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Applies `updater` to the cached value of `key` now and runs `remote`.
    ///
    /// Subscribers see the predicted value before this returns. If `remote`
    /// fails, the value is restored and the error is returned through the
    /// handle; it is not recorded on the entry. Must be called from within
    /// a Tokio runtime.
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
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let updater: Updater<V> = Arc::new(updater);
        let lane = self.lane(key);
        let (done, finished) = oneshot::channel::<()>();

        let previous = self.store.exclusive(|| {
            let guard = lane.queue.lock();
            let (predicted, previous) = {
                let mut queue = guard.borrow_mut();
                let current = self.store.get(key).value;
                if queue.pending.is_empty() {
                    queue.patch = OptimisticPatch { snapshot: current.clone() };
                }
                let predicted = updater(current.as_ref());
                queue.pending.push(PendingMutation {
                    id,
                    updater: updater.clone(),
                    predicted: predicted.is_some(),
                });
                (predicted, queue.tail.replace(finished))
            };
            self.store.begin_mutation(key);
            if let Some(value) = predicted {
                debug!(%key, id, "Applying optimistic value");
                self.store.write_optimistic(key, Some(value));
            }
            previous
        });

        let this = self.clone();
        let owned_key = key.clone();
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let outcome = remote().await;
            match &outcome {
                Ok(_) => this.confirm(&owned_key, &lane, id, &options),
                Err(err) => this.roll_back(&owned_key, &lane, id, err),
            }
            drop(done);
            outcome
        });

        MutationHandle { key: key.clone(), task }
    }

    /// Number of mutations of `key` whose remote operation has not settled.
    pub fn pending(&self, key: &CacheKey) -> usize {
        self.lanes
            .get(key)
            .map_or(0, |lane| lane.queue.lock().borrow().pending.len())
    }

    fn lane(&self, key: &CacheKey) -> Arc<Lane<V>> {
        self.lanes
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Lane {
                    queue: ReentrantMutex::new(RefCell::new(MutationQueue::new())),
                })
            })
            .clone()
    }

    fn confirm(&self, key: &CacheKey, lane: &Lane<V>, id: u64, options: &MutateOptions) {
        {
            let guard = lane.queue.lock();
            let mut queue = guard.borrow_mut();
            if let Some(confirmed) = queue.take(id) {
                let snapshot = queue.patch.snapshot.take();
                queue.patch.snapshot = apply(&confirmed.updater, snapshot);
            }
        }
        let remaining = self.store.end_mutation(key);
        info!(%key, id, "Mutation confirmed");
        self.rearm(key, remaining);

        if let Some(delay) = options.revalidate_after {
            self.revalidator.revalidate_after(key.clone(), delay);
        }
        for matcher in &options.invalidate {
            self.revalidator.invalidate(matcher);
        }
    }

    fn roll_back(&self, key: &CacheKey, lane: &Lane<V>, id: u64, err: &FeedError) {
        warn!(%key, id, error = %err, "Mutation failed, rolling back");
        let remaining = self.store.exclusive(|| {
            let guard = lane.queue.lock();
            let restored = {
                let mut queue = guard.borrow_mut();
                match queue.take(id) {
                    Some(failed) if failed.predicted => Some(queue.replay()),
                    _ => None,
                }
            };
            if let Some(value) = restored {
                self.store.write_optimistic(key, value);
            }
            self.store.end_mutation(key)
        });
        self.rearm(key, remaining);
    }

    /// Refetches a watched key whose fetch result was held back while
    /// mutations were pending.
    fn rearm(&self, key: &CacheKey, remaining: usize) {
        if remaining > 0 || self.store.subscriber_count(key) == 0 {
            return;
        }
        if self.store.get(key).needs_revalidation() {
            debug!(%key, "Refetching key after its mutations settled");
            drop(self.revalidator.trigger(key));
        }
    }
}

impl<V> fmt::Debug for OptimisticMutator<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticMutator")
            .field("keys", &self.lanes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use feed_cache::CacheEntry;
    use feed_core::Fetcher;
    use parking_lot::Mutex;

    use crate::dedup::Deduplicator;

    struct ServerList {
        calls: AtomicUsize,
        value: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Fetcher<Vec<i64>> for ServerList {
        async fn fetch(&self, _key: &CacheKey) -> Result<Vec<i64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.lock().clone())
        }
    }

    fn setup(server: Vec<i64>) -> (Arc<ServerList>, OptimisticMutator<Vec<i64>>) {
        let fetcher = Arc::new(ServerList {
            calls: AtomicUsize::new(0),
            value: Mutex::new(server),
        });
        let store = Arc::new(CacheStore::new());
        let dedup = Deduplicator::new(store.clone());
        let revalidator = Revalidator::new(store, dedup, fetcher.clone());
        (fetcher, OptimisticMutator::new(revalidator))
    }

    fn without(id: i64) -> impl Fn(Option<&Vec<i64>>) -> Option<Vec<i64>> + Send + Sync {
        move |current| current.map(|list| list.iter().copied().filter(|&x| x != id).collect())
    }

    fn record(store: &CacheStore<Vec<i64>>, key: &CacheKey) -> Arc<Mutex<Vec<Option<Vec<i64>>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        store.subscribe(
            key,
            Arc::new(move |entry: &CacheEntry<Vec<i64>>| log.lock().push(entry.value.clone())),
        );
        seen
    }

    #[tokio::test]
    async fn test_optimistic_value_visible_immediately() {
        let (_, mutator) = setup(vec![]);
        let store = mutator.store.clone();
        let key = CacheKey::from("items:1w");
        store.set_value(&key, vec![41, 42, 43]);
        let seen = record(&store, &key);

        let (release, gate) = oneshot::channel::<()>();
        let handle = mutator.mutate(
            &key,
            without(42),
            move || async move {
                let _ = gate.await;
                Ok(())
            },
            MutateOptions::new(),
        );

        assert_eq!(store.get(&key).value, Some(vec![41, 43]));
        assert_eq!(*seen.lock(), vec![Some(vec![41, 43])]);
        assert_eq!(mutator.pending(&key), 1);

        release.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(store.get(&key).value, Some(vec![41, 43]));
        assert_eq!(mutator.pending(&key), 0);
    }

    #[tokio::test]
    async fn test_failure_restores_snapshot() {
        let (_, mutator) = setup(vec![]);
        let store = mutator.store.clone();
        let key = CacheKey::from("items:1w");
        store.set_value(&key, vec![41, 42, 43]);
        let before = store.get(&key);
        let seen = record(&store, &key);

        let result = mutator
            .mutate(
                &key,
                without(42),
                || async { Err::<(), _>(FeedError::bad_status(500, "nope")) },
                MutateOptions::new().revalidate_after(Duration::from_millis(1)),
            )
            .await;

        assert_eq!(result.unwrap_err(), FeedError::bad_status(500, "nope"));
        let after = store.get(&key);
        assert_eq!(after.value, before.value);
        assert_eq!(after.error, None);
        assert_eq!(
            *seen.lock(),
            vec![Some(vec![41, 43]), Some(vec![41, 42, 43])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_schedules_revalidation() {
        let (server, mutator) = setup(vec![41, 43]);
        let store = mutator.store.clone();
        let key = CacheKey::from("items:1w");
        store.set_value(&key, vec![41, 42, 43]);

        mutator
            .mutate(
                &key,
                without(42),
                || async { Ok(()) },
                MutateOptions::new().revalidate_after(Duration::from_secs(2)),
            )
            .await
            .unwrap();
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&key).value, Some(vec![41, 43]));
    }

    #[tokio::test]
    async fn test_success_invalidates_watched_keys() {
        let (server, mutator) = setup(vec![7]);
        let store = mutator.store.clone();
        let sources = CacheKey::from("sources");
        store.set_value(&sources, vec![]);
        let seen = record(&store, &sources);

        mutator
            .mutate(
                &CacheKey::from("source:7"),
                |_: Option<&Vec<i64>>| None,
                || async { Ok(()) },
                MutateOptions::new().invalidate(sources.clone()),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![Some(vec![7])]);
    }

    #[tokio::test]
    async fn test_failed_first_mutation_keeps_second() {
        let (_, mutator) = setup(vec![]);
        let store = mutator.store.clone();
        let key = CacheKey::from("items:1w");
        store.set_value(&key, vec![1, 2, 3]);

        let (fail_first, first_gate) = oneshot::channel::<()>();
        let first = mutator.mutate(
            &key,
            without(1),
            move || async move {
                let _ = first_gate.await;
                Err::<(), _>(FeedError::HttpError("offline".into()))
            },
            MutateOptions::new(),
        );
        let second = mutator.mutate(&key, without(2), || async { Ok(()) }, MutateOptions::new());
        assert_eq!(store.get(&key).value, Some(vec![3]));
        assert_eq!(mutator.pending(&key), 2);

        fail_first.send(()).unwrap();
        tokio_test::assert_err!(first.await);
        assert_eq!(store.get(&key).value, Some(vec![1, 3]));

        second.await.unwrap();
        assert_eq!(store.get(&key).value, Some(vec![1, 3]));
        assert_eq!(mutator.pending(&key), 0);
    }

    #[tokio::test]
    async fn test_remote_operations_run_in_call_order() {
        let (_, mutator) = setup(vec![]);
        let key = CacheKey::from("tags");
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|n| {
                let order = order.clone();
                mutator.mutate(
                    &key,
                    |_: Option<&Vec<i64>>| None,
                    move || async move {
                        tokio::time::sleep(Duration::from_millis(5 * (5 - n))).await;
                        order.lock().push(n);
                        Ok(())
                    },
                    MutateOptions::new(),
                )
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_fetch_during_mutation_is_refetched_after_it_settles() {
        let (server, mutator) = setup(vec![1, 5]);
        let store = mutator.store.clone();
        let key = CacheKey::from("items:1w");
        store.set_value(&key, vec![1, 2]);
        let seen = record(&store, &key);

        let fetch = mutator.revalidator.trigger(&key);
        mutator
            .mutate(&key, without(2), || async { Ok(()) }, MutateOptions::new())
            .await
            .unwrap();
        assert_eq!(fetch.await.unwrap(), vec![1, 5]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(server.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock(), vec![Some(vec![1]), Some(vec![1, 5])]);
        let entry = store.get(&key);
        assert!(!entry.stale);
        assert!(!entry.is_validating);
    }

    #[tokio::test]
    async fn test_failed_mutation_without_prediction_is_silent() {
        let (_, mutator) = setup(vec![]);
        let store = mutator.store.clone();
        let key = CacheKey::from("sources");
        store.set_value(&key, vec![1]);
        let seen = record(&store, &key);

        let result = mutator
            .mutate(
                &key,
                |_: Option<&Vec<i64>>| None,
                || async { Err::<(), _>(FeedError::bad_status(400, "invalid url")) },
                MutateOptions::new().invalidate(key.clone()),
            )
            .await;

        tokio_test::assert_err!(result);
        assert!(seen.lock().is_empty());
        assert_eq!(store.get(&key).value, Some(vec![1]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscriber_mutating_during_concurrent_writes_does_not_deadlock() {
        let (_, mutator) = setup(vec![]);
        let store = mutator.store.clone();
        let key = CacheKey::from("items:1w");
        store.set_value(&key, vec![0]);

        let reactions = Arc::new(AtomicUsize::new(0));
        let counter = reactions.clone();
        let reactor = mutator.clone();
        let watched = key.clone();
        store.subscribe(
            &key,
            Arc::new(move |_: &CacheEntry<Vec<i64>>| {
                if counter.fetch_add(1, Ordering::SeqCst) < 200 {
                    drop(reactor.mutate(
                        &watched,
                        |_: Option<&Vec<i64>>| None,
                        || async { Ok(()) },
                        MutateOptions::new(),
                    ));
                }
            }),
        );

        let writers: Vec<_> = (0..4i64)
            .map(|n| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    for i in 0..50i64 {
                        store.set_value(&key, vec![n, i]);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        let failing: Vec<_> = (0..50i64)
            .map(|i| {
                mutator.mutate(
                    &key,
                    move |current: Option<&Vec<i64>>| {
                        current.map(|list| list.iter().copied().chain([i]).collect())
                    },
                    || async {
                        tokio::task::yield_now().await;
                        Err::<(), _>(FeedError::HttpError("down".into()))
                    },
                    MutateOptions::new(),
                )
            })
            .collect();

        let settled = async {
            for writer in writers {
                writer.await.unwrap();
            }
            for handle in failing {
                assert!(handle.await.is_err());
            }
        };
        tokio::time::timeout(Duration::from_secs(10), settled)
            .await
            .expect("writers and rollbacks did not finish");
        assert!(reactions.load(Ordering::SeqCst) > 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_failed_mutations_restore_server_list(
            list in proptest::collection::vec(0i64..20, 0..12),
            removals in proptest::collection::vec(0i64..20, 1..6),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let after = runtime.block_on(async {
                let (_, mutator) = setup(vec![]);
                let key = CacheKey::from("items:1w");
                mutator.store.set_value(&key, list.clone());
                let handles: Vec<_> = removals
                    .iter()
                    .map(|&id| {
                        mutator.mutate(
                            &key,
                            without(id),
                            || async { Err::<(), _>(FeedError::HttpError("down".into())) },
                            MutateOptions::new(),
                        )
                    })
                    .collect();
                for handle in handles {
                    assert!(handle.await.is_err());
                }
                mutator.store.get(&key).value
            });
            proptest::prop_assert_eq!(after, Some(list));
        }
    }
}
