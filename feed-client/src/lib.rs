//! # Feed Client
//!
//! HTTP access to the my-feed server on top of the sync engine.
//!
//! - [`HttpTransport`]: reqwest transport with timeouts and status checks
//! - [`MemoryTokenStore`]: the auth token, observable through a watch channel
//! - [`FeedFetcher`]: decodes each cache key's response into a [`Payload`]
//! - [`FeedClient`]: typed reads, subscriptions, and optimistic writes
//!
//! ## Example
//!
//! ```rust,ignore
//! use feed_client::{ClientConfig, FeedClient};
//! use feed_core::TimeWindow;
//!
//! let client = FeedClient::new(ClientConfig::from_env()?)?;
//! let items = client.items(TimeWindow::OneWeek).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

mod client;
mod config;
mod fetcher;
mod token;
mod transport;

pub use client::FeedClient;
pub use config::ClientConfig;
pub use fetcher::{FeedFetcher, Payload};
pub use token::MemoryTokenStore;
pub use transport::HttpTransport;
