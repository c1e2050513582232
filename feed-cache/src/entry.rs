//! Snapshot of one cached resource.

use chrono::{DateTime, Utc};

use feed_core::{CacheKey, FeedError};

/// Cached state of one key.
///
/// `value` survives a failed refresh (stale-while-error); a successful
/// refresh clears `error`.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry<V> {
    /// Key this entry belongs to
    pub key: CacheKey,
    /// Last known value
    pub value: Option<V>,
    /// Error of the most recent failed fetch
    pub error: Option<FeedError>,
    /// Whether a fetch for this key is in flight
    pub is_validating: bool,
    /// When the value or error was last written
    pub updated_at: Option<DateTime<Utc>>,
    /// Marked for refetch by an invalidation
    pub stale: bool,
}

impl<V> CacheEntry<V> {
    /// Creates an entry that has never been fetched.
    pub fn empty(key: CacheKey) -> Self {
        Self {
            key,
            value: None,
            error: None,
            is_validating: false,
            updated_at: None,
            stale: false,
        }
    }

    /// True if neither a value nor an error was ever recorded.
    pub fn is_unfetched(&self) -> bool {
        self.value.is_none() && self.error.is_none()
    }

    /// True if a subscriber arriving now should trigger a fetch.
    pub fn needs_revalidation(&self) -> bool {
        !self.is_validating && (self.is_unfetched() || self.stale)
    }

    pub(crate) fn write(&mut self, outcome: Result<V, FeedError>) {
        match outcome {
            Ok(value) => {
                self.value = Some(value);
                self.error = None;
            }
            Err(err) => self.error = Some(err),
        }
        self.updated_at = Some(Utc::now());
        self.stale = false;
    }
}
