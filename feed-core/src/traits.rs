//! Common traits for my-feed.
//!
//! These traits define the seams between the synchronization engine and
//! its collaborators, enabling modularity and testing.

use async_trait::async_trait;

use crate::error::Result;
use crate::key::{CacheKey, RequestSpec};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Executes one HTTP request against the feed server.
///
/// Implementations must treat any non-2xx status as a failure and must not
/// hand the body of a failed response back as a success payload.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the raw success body.
    async fn send(&self, request: RequestSpec) -> Result<Vec<u8>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Holds the single opaque auth token.
///
/// The engine only reads it to build request headers.
pub trait TokenStore: Send + Sync {
    /// Returns the current token, if any.
    fn get_token(&self) -> Option<String>;

    /// Replaces (or clears) the token.
    fn set_token(&self, token: Option<String>);
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOADER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Loads the current server value for a cache key.
///
/// The engine calls this at most once per key while a load is pending.
#[async_trait]
pub trait Fetcher<V>: Send + Sync {
    /// Fetches and decodes the resource named by `key`.
    async fn fetch(&self, key: &CacheKey) -> Result<V>;
}
