//! Process-wide cache store.

use std::collections::HashMap;
use std::fmt;

use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use feed_core::{CacheKey, FeedError, KeyMatch, Result};

use crate::bus::{Callback, NotificationBus, Subscription};
use crate::entry::CacheEntry;

/// Proof that a fetch was started, used to settle it.
///
/// Carries the write epoch observed at start so that a result overtaken by
/// an optimistic write is dropped instead of clobbering it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    /// Key being fetched
    pub key: CacheKey,
    epoch: u64,
}

/// What became of a fetch outcome handed to [`CacheStore::settle_fetch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Written to the entry; subscribers were notified
    Applied,
    /// Dropped because a mutation is pending; the entry is left stale
    Deferred,
    /// Dropped because a write or invalidation overtook it. The fetch is
    /// still registered under the renewed ticket and should be retried.
    Superseded(FetchTicket),
}

struct Slot<V> {
    entry: CacheEntry<V>,
    /// Bumped by every optimistic write, invalidation and mutation boundary
    epoch: u64,
    pending_mutations: usize,
}

impl<V> Slot<V> {
    fn new(key: CacheKey) -> Self {
        Self {
            entry: CacheEntry::empty(key),
            epoch: 0,
            pending_mutations: 0,
        }
    }
}

/// In-memory store of cache entries, one per key.
///
/// Entries are created lazily and never evicted. Every write that changes a
/// value or error is delivered to the key's subscribers before the write
/// call returns. Writes and their deliveries are serialized across threads,
/// so subscribers observe the same order of states the store went through.
pub struct CacheStore<V> {
    slots: RwLock<HashMap<CacheKey, Slot<V>>>,
    bus: NotificationBus<V>,
    delivery: ReentrantMutex<()>,
}

impl<V: Clone> CacheStore<V> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            bus: NotificationBus::new(),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Returns the entry for `key`, creating an empty one on first access.
    pub fn get(&self, key: &CacheKey) -> CacheEntry<V> {
        if let Some(slot) = self.slots.read().get(key) {
            return slot.entry.clone();
        }
        self.slots
            .write()
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone()))
            .entry
            .clone()
    }

    /// Returns the entry for `key` without creating it.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.slots.read().get(key).map(|slot| slot.entry.clone())
    }

    /// Writes a fetch outcome and notifies subscribers.
    ///
    /// A value clears the error; an error keeps the last value.
    pub fn set(&self, key: &CacheKey, outcome: Result<V>) {
        self.modify(key, |slot| {
            slot.entry.write(outcome);
            true
        });
    }

    /// Writes a value and notifies subscribers.
    pub fn set_value(&self, key: &CacheKey, value: V) {
        self.set(key, Ok(value));
    }

    /// Records an error (keeping the last value) and notifies subscribers.
    pub fn set_error(&self, key: &CacheKey, error: FeedError) {
        self.set(key, Err(error));
    }

    /// Marks `key` as validating. Silent: readers pick it up via `get`.
    pub fn begin_fetch(&self, key: &CacheKey) -> FetchTicket {
        let mut slots = self.slots.write();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(key.clone()));
        slot.entry.is_validating = true;
        FetchTicket {
            key: key.clone(),
            epoch: slot.epoch,
        }
    }

    /// Writes the outcome of a fetch unless it was overtaken.
    ///
    /// While a mutation is pending the outcome is dropped and the entry is
    /// marked stale, so it is refetched once the mutation settles. If only the
    /// epoch moved (an optimistic write or an invalidation since the fetch
    /// started), the entry stays validating and a renewed ticket is returned.
    pub fn settle_fetch(&self, ticket: &FetchTicket, outcome: Result<V>) -> Settlement {
        let _delivery = self.delivery.lock();
        let snapshot = {
            let mut slots = self.slots.write();
            let slot = slots
                .entry(ticket.key.clone())
                .or_insert_with(|| Slot::new(ticket.key.clone()));
            if slot.pending_mutations > 0 {
                debug!(key = %ticket.key, "Deferring fetch result until mutations settle");
                slot.entry.is_validating = false;
                slot.entry.stale = true;
                return Settlement::Deferred;
            }
            if slot.epoch != ticket.epoch {
                debug!(key = %ticket.key, "Fetch result overtaken by a write");
                return Settlement::Superseded(FetchTicket {
                    key: ticket.key.clone(),
                    epoch: slot.epoch,
                });
            }
            slot.entry.is_validating = false;
            slot.entry.write(outcome);
            slot.entry.clone()
        };
        self.bus.notify(&snapshot);
        Settlement::Applied
    }

    /// Gives up on a fetch without writing anything.
    ///
    /// The entry is left stale so the next read or subscribe refetches it.
    pub fn abandon_fetch(&self, ticket: &FetchTicket) {
        if let Some(slot) = self.slots.write().get_mut(&ticket.key) {
            slot.entry.is_validating = false;
            slot.entry.stale = true;
        }
    }

    /// Replaces the value with a locally predicted (or restored) one.
    ///
    /// The error field is left alone so that a rollback restores the exact
    /// pre-mutation entry.
    pub fn write_optimistic(&self, key: &CacheKey, value: Option<V>) {
        self.modify(key, |slot| {
            slot.epoch += 1;
            slot.entry.value = value;
            slot.entry.updated_at = Some(chrono::Utc::now());
            true
        });
    }

    /// Registers a mutation in flight for `key`.
    pub fn begin_mutation(&self, key: &CacheKey) {
        let mut slots = self.slots.write();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(key.clone()));
        slot.pending_mutations += 1;
        slot.epoch += 1;
    }

    /// Unregisters a settled mutation for `key`.
    ///
    /// Returns the number of mutations still pending for the key.
    pub fn end_mutation(&self, key: &CacheKey) -> usize {
        match self.slots.write().get_mut(key) {
            Some(slot) => {
                slot.pending_mutations = slot.pending_mutations.saturating_sub(1);
                slot.epoch += 1;
                slot.pending_mutations
            }
            None => 0,
        }
    }

    /// Marks matching entries stale without discarding their values.
    ///
    /// A fetch already in flight for a matched key no longer settles with its
    /// result. Returns the matched keys.
    pub fn invalidate(&self, matcher: &KeyMatch) -> Vec<CacheKey> {
        let mut slots = self.slots.write();
        let mut matched = Vec::new();
        for (key, slot) in slots.iter_mut().filter(|(key, _)| matcher.matches(key)) {
            slot.entry.stale = true;
            slot.epoch += 1;
            matched.push(key.clone());
        }
        matched.sort();
        debug!(?matcher, count = matched.len(), "Invalidated entries");
        matched
    }

    /// Runs `f` with writes from other threads held off.
    ///
    /// Writes made by `f` itself, and by the callbacks they trigger, go
    /// through. Callers that guard store writes with a lock of their own take
    /// it inside `f`, so the delivery lock is always acquired first.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _delivery = self.delivery.lock();
        f()
    }

    /// Registers a change callback for `key`.
    pub fn subscribe(&self, key: &CacheKey, callback: Callback<V>) -> Subscription {
        self.bus.subscribe(key.clone(), callback)
    }

    /// Removes a change callback.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.bus.unsubscribe(subscription)
    }

    /// Number of subscribers of `key`.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.bus.subscriber_count(key)
    }

    /// All keys with an entry.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.slots.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Returns store statistics.
    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.read();
        let entries = slots.values().map(|slot| &slot.entry);
        let mut stats = CacheStats {
            total_entries: slots.len(),
            subscribers: self.bus.len(),
            ..Default::default()
        };
        for entry in entries {
            stats.with_value += entry.value.is_some() as usize;
            stats.with_error += entry.error.is_some() as usize;
            stats.validating += entry.is_validating as usize;
            stats.stale += entry.stale as usize;
        }
        stats
    }

    /// Applies `change` to the slot and, if it reports a change, notifies.
    fn modify<F>(&self, key: &CacheKey, change: F) -> bool
    where
        F: FnOnce(&mut Slot<V>) -> bool,
    {
        let _delivery = self.delivery.lock();
        let snapshot = {
            let mut slots = self.slots.write();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(key.clone()));
            if !change(slot) {
                return false;
            }
            slot.entry.clone()
        };
        self.bus.notify(&snapshot);
        true
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.slots.read().len())
            .field("bus", &self.bus)
            .finish()
    }
}

/// Cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total entries
    pub total_entries: usize,
    /// Entries holding a value
    pub with_value: usize,
    /// Entries holding an error
    pub with_error: usize,
    /// Entries with a fetch in flight
    pub validating: usize,
    /// Entries marked for refetch
    pub stale: usize,
    /// Registered subscribers across all keys
    pub subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use proptest::prelude::*;

    fn key(raw: &str) -> CacheKey {
        CacheKey::from(raw)
    }

    fn counter(store: &CacheStore<u32>, raw: &str) -> Arc<Mutex<Vec<Option<u32>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(
            &key(raw),
            Arc::new(move |entry: &CacheEntry<u32>| sink.lock().push(entry.value)),
        );
        seen
    }

    #[test]
    fn test_get_creates_empty_entry() {
        let store: CacheStore<u32> = CacheStore::new();
        assert!(store.peek(&key("tags")).is_none());

        let entry = store.get(&key("tags"));
        assert!(entry.is_unfetched());
        assert!(!entry.is_validating);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_then_get() {
        let store = CacheStore::new();
        store.set_value(&key("tags"), 7u32);

        let entry = store.get(&key("tags"));
        assert_eq!(entry.value, Some(7));
        assert!(entry.updated_at.is_some());
    }

    #[test]
    fn test_set_notifies_only_that_key() {
        let store = CacheStore::new();
        let tags = counter(&store, "tags");
        let sources = counter(&store, "sources");

        store.set_value(&key("tags"), 1);
        assert_eq!(*tags.lock(), vec![Some(1)]);
        assert!(sources.lock().is_empty());
    }

    #[test]
    fn test_stale_while_error() {
        let store = CacheStore::new();
        store.set_value(&key("tags"), 1u32);
        store.set_error(&key("tags"), FeedError::HttpError("offline".into()));

        let entry = store.get(&key("tags"));
        assert_eq!(entry.value, Some(1));
        assert!(entry.error.is_some());
    }

    #[test]
    fn test_invalidate_keeps_value() {
        let store = CacheStore::new();
        store.set_value(&key("items:1w"), 1u32);
        store.set_value(&key("items:1d"), 2u32);
        store.set_value(&key("tags"), 3u32);
        let seen = counter(&store, "items:1w");

        let matched = store.invalidate(&KeyMatch::Prefix("items:".into()));
        assert_eq!(matched, vec![key("items:1d"), key("items:1w")]);

        let entry = store.get(&key("items:1w"));
        assert_eq!(entry.value, Some(1));
        assert!(entry.stale);
        assert!(!store.get(&key("tags")).stale);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_fetch_lifecycle() {
        let store = CacheStore::new();
        let seen = counter(&store, "tags");

        let ticket = store.begin_fetch(&key("tags"));
        assert!(store.get(&key("tags")).is_validating);
        assert!(seen.lock().is_empty());

        assert_eq!(store.settle_fetch(&ticket, Ok(5u32)), Settlement::Applied);
        let entry = store.get(&key("tags"));
        assert!(!entry.is_validating);
        assert_eq!(entry.value, Some(5));
        assert_eq!(*seen.lock(), vec![Some(5)]);
    }

    #[test]
    fn test_fetch_overtaken_by_optimistic_write_is_renewed() {
        let store = CacheStore::new();
        store.set_value(&key("tags"), 1u32);
        let seen = counter(&store, "tags");

        let ticket = store.begin_fetch(&key("tags"));
        store.write_optimistic(&key("tags"), Some(2));
        let Settlement::Superseded(renewed) = store.settle_fetch(&ticket, Ok(1)) else {
            panic!("overtaken fetch was written");
        };

        let entry = store.get(&key("tags"));
        assert_eq!(entry.value, Some(2));
        assert!(entry.is_validating);

        assert_eq!(store.settle_fetch(&renewed, Ok(3)), Settlement::Applied);
        assert_eq!(store.get(&key("tags")).value, Some(3));
        assert_eq!(*seen.lock(), vec![Some(2), Some(3)]);
    }

    #[test]
    fn test_fetch_during_pending_mutation_leaves_entry_stale() {
        let store = CacheStore::new();
        store.begin_mutation(&key("tags"));
        store.write_optimistic(&key("tags"), Some(9u32));

        let ticket = store.begin_fetch(&key("tags"));
        assert_eq!(store.settle_fetch(&ticket, Ok(1)), Settlement::Deferred);
        let entry = store.get(&key("tags"));
        assert_eq!(entry.value, Some(9));
        assert!(entry.needs_revalidation());
        assert_eq!(store.end_mutation(&key("tags")), 0);

        let ticket = store.begin_fetch(&key("tags"));
        assert_eq!(store.settle_fetch(&ticket, Ok(1)), Settlement::Applied);
        let entry = store.get(&key("tags"));
        assert_eq!(entry.value, Some(1));
        assert!(!entry.stale);
    }

    #[test]
    fn test_invalidate_overtakes_fetch_in_flight() {
        let store = CacheStore::new();
        store.set_value(&key("sources"), 1u32);

        let ticket = store.begin_fetch(&key("sources"));
        store.invalidate(&KeyMatch::Exact(key("sources")));
        assert!(matches!(
            store.settle_fetch(&ticket, Ok(1)),
            Settlement::Superseded(_)
        ));
        assert!(store.get(&key("sources")).stale);
    }

    #[test]
    fn test_abandoned_fetch_is_rearmed() {
        let store: CacheStore<u32> = CacheStore::new();
        let ticket = store.begin_fetch(&key("tags"));
        store.abandon_fetch(&ticket);

        let entry = store.get(&key("tags"));
        assert!(!entry.is_validating);
        assert!(entry.needs_revalidation());
    }

    #[test]
    fn test_end_mutation_counts_remaining() {
        let store: CacheStore<u32> = CacheStore::new();
        store.begin_mutation(&key("tags"));
        store.begin_mutation(&key("tags"));
        assert_eq!(store.end_mutation(&key("tags")), 1);
        assert_eq!(store.end_mutation(&key("tags")), 0);
        assert_eq!(store.end_mutation(&key("sources")), 0);
    }

    #[test]
    fn test_exclusive_holds_off_other_writers() {
        let store = Arc::new(CacheStore::<u32>::new());
        let seen = counter(&store, "tags");

        store.exclusive(|| {
            let writer = store.clone();
            let handle = std::thread::spawn(move || writer.set_value(&key("tags"), 2));
            std::thread::sleep(std::time::Duration::from_millis(20));
            store.set_value(&key("tags"), 1);
            assert_eq!(*seen.lock(), vec![Some(1)]);
            handle
        })
        .join()
        .unwrap();

        assert_eq!(*seen.lock(), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_callback_can_read_store() {
        let store = Arc::new(CacheStore::<u32>::new());
        let observed = Arc::new(Mutex::new(None));

        let reader = store.clone();
        let sink = observed.clone();
        store.subscribe(
            &key("tags"),
            Arc::new(move |entry: &CacheEntry<u32>| {
                *sink.lock() = reader.get(&entry.key).value;
            }),
        );

        store.set_value(&key("tags"), 3);
        assert_eq!(*observed.lock(), Some(3));
    }

    #[test]
    fn test_stats() {
        let store = CacheStore::new();
        store.set_value(&key("tags"), 1u32);
        store.set_error(&key("sources"), FeedError::HttpError("x".into()));
        store.begin_fetch(&key("items:1w"));
        let _seen = counter(&store, "tags");

        let stats = store.stats();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.with_value, 1);
        assert_eq!(stats.with_error, 1);
        assert_eq!(stats.validating, 1);
        assert_eq!(stats.subscribers, 1);
    }

    proptest! {
        #[test]
        fn prop_set_then_get_is_consistent(
            writes in prop::collection::vec((0usize..4, any::<u32>()), 1..32)
        ) {
            let names = ["items:1d", "items:1w", "tags", "sources"];
            let store = CacheStore::new();
            let mut expected = HashMap::new();

            for (index, value) in writes {
                let k = key(names[index]);
                store.set_value(&k, value);
                prop_assert_eq!(store.get(&k).value, Some(value));
                expected.insert(k, value);
            }
            for (k, value) in expected {
                prop_assert_eq!(store.get(&k).value, Some(value));
            }
        }
    }
}
