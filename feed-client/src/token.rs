//! In-memory token store.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::watch;

use feed_core::{TokenStore, TOKEN_STORE_KEY};

/// Keeps the auth token under the fixed key `auth` and broadcasts changes.
///
/// Every holder of a [`watch::Receiver`] from [`MemoryTokenStore::watch`]
/// sees the latest token after each change.
#[derive(Debug)]
pub struct MemoryTokenStore {
    slots: RwLock<HashMap<String, String>>,
    changes: watch::Sender<Option<String>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            slots: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Creates a store holding `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set_token(Some(token.into()));
        store
    }

    /// Subscribes to token changes.
    pub fn watch(&self) -> watch::Receiver<Option<String>> {
        self.changes.subscribe()
    }

    /// True if a token is stored.
    pub fn is_authenticated(&self) -> bool {
        self.slots.read().contains_key(TOKEN_STORE_KEY)
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get_token(&self) -> Option<String> {
        self.slots.read().get(TOKEN_STORE_KEY).cloned()
    }

    fn set_token(&self, token: Option<String>) {
        {
            let mut slots = self.slots.write();
            match &token {
                Some(token) => slots.insert(TOKEN_STORE_KEY.to_string(), token.clone()),
                None => slots.remove(TOKEN_STORE_KEY),
            };
        }
        self.changes.send_replace(token);
    }
}
