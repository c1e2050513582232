//! Cache store for my-feed.
//!
//! Keeps the last known value (or error) per cache key for the lifetime of
//! the process and notifies subscribers synchronously whenever an entry
//! changes.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod bus;
mod entry;
mod store;

pub use bus::{Callback, NotificationBus, Subscription, SubscriberId};
pub use entry::CacheEntry;
pub use store::{CacheStats, CacheStore, FetchTicket, Settlement};
