//! Subscription registry and synchronous change notification.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use feed_core::CacheKey;

use crate::entry::CacheEntry;

/// Change callback registered by a consumer.
pub type Callback<V> = Arc<dyn Fn(&CacheEntry<V>) + Send + Sync>;

/// Identifier of one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Handle returned by `subscribe`; pass it back to unsubscribe.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Registration id
    pub id: SubscriberId,
    /// Key the registration observes
    pub key: CacheKey,
}

struct Subscriber<V> {
    id: SubscriberId,
    callback: Callback<V>,
}

/// Per-key lists of subscribers, kept in registration order.
pub struct NotificationBus<V> {
    subscribers: RwLock<HashMap<CacheKey, Vec<Subscriber<V>>>>,
    next_id: AtomicU64,
}

impl<V> NotificationBus<V> {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback` for changes to `key`.
    ///
    /// The callback is not invoked for the current state, only for later changes.
    pub fn subscribe(&self, key: CacheKey, callback: Callback<V>) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .write()
            .entry(key.clone())
            .or_default()
            .push(Subscriber { id, callback });
        trace!(%key, id = id.0, "Subscribed");
        Subscription { id, key }
    }

    /// Removes a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(&subscription.key) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != subscription.id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&subscription.key);
        }
        removed
    }

    /// Delivers `entry` to every subscriber of its key, in registration order.
    ///
    /// Callbacks run without the registry lock held, so they may subscribe,
    /// unsubscribe, or read the store.
    pub fn notify(&self, entry: &CacheEntry<V>) {
        let callbacks: Vec<Callback<V>> = match self.subscribers.read().get(&entry.key) {
            Some(list) => list.iter().map(|s| s.callback.clone()).collect(),
            None => return,
        };
        trace!(key = %entry.key, count = callbacks.len(), "Notifying subscribers");
        for callback in callbacks {
            callback(entry);
        }
    }

    /// Number of subscribers of `key`.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.subscribers.read().get(key).map_or(0, Vec::len)
    }

    /// Keys with at least one subscriber.
    pub fn subscribed_keys(&self) -> Vec<CacheKey> {
        self.subscribers.read().keys().cloned().collect()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }

    /// Returns true if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

impl<V> Default for NotificationBus<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for NotificationBus<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.len())
            .finish()
    }
}
