//! # my-feed Core
//!
//! Core types, errors, and traits for the my-feed synchronization engine.
//!
//! This crate provides the foundational building blocks used by all other my-feed crates:
//!
//! - **Types**: Domain models for feed items, tags, sources, and time windows
//! - **Key codec**: Canonical cache keys and the requests they map to
//! - **Errors**: A single cloneable error type shared by every settled request
//! - **Constants**: API paths, header names, and engine defaults
//! - **Traits**: Seams for transport, token storage, and loaders
//!
//! ## Example
//!
//! ```rust
//! use feed_core::{FeedKey, TimeWindow};
//!
//! let key = FeedKey::items(TimeWindow::OneWeek).encode();
//! assert_eq!(key.as_str(), "items:1w");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod key;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{FeedError, Result};
pub use key::*;
pub use traits::*;
pub use types::*;
