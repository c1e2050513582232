//! # Feed Sync
//!
//! Keeps the client-side cache in step with the feed server.
//!
//! ## Components
//!
//! - [`Deduplicator`]: at most one in-flight request per key
//! - [`Revalidator`]: refetching, delayed reconciliation, and invalidation
//! - [`OptimisticMutator`]: local predictions with rollback on failure
//! - [`SyncEngine`]: the facade wiring all of the above to one [`CacheStore`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use feed_sync::{EngineConfig, SyncEngine};
//!
//! let engine = SyncEngine::new(fetcher, EngineConfig::default());
//! let sub = engine.subscribe(&"items:1w".into(), |entry| println!("{:?}", entry.value));
//! ```
//!
//! [`CacheStore`]: feed_cache::CacheStore

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

mod dedup;
mod engine;
mod mutate;
mod revalidate;

pub use dedup::{Deduplicator, SharedFetch};
pub use engine::{EngineConfig, SyncEngine};
pub use mutate::{MutateOptions, MutationHandle, OptimisticMutator, Updater};
pub use revalidate::Revalidator;

pub use feed_cache::{CacheEntry, CacheStats, CacheStore, Subscription};
