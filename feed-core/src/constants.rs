//! Protocol constants for my-feed.
//!
//! Paths and header names match the feed server's HTTP API.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP API
// ═══════════════════════════════════════════════════════════════════════════════

/// Base URL of a locally running feed server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8013";

/// Prefix under which every API route is mounted.
pub const API_PREFIX: &str = "/api";

/// Header carrying the opaque auth token on write requests.
pub const AUTH_HEADER: &str = "x-auth";

/// Content type sent with JSON request bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed name under which the auth token is stored.
pub const TOKEN_STORE_KEY: &str = "auth";

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE KEYS
// ═══════════════════════════════════════════════════════════════════════════════

/// Key prefix for item lists (`items:1w`, `items:1w:all`).
pub const ITEMS_KEY_PREFIX: &str = "items";

/// Key prefix for single items (`item:42`).
pub const ITEM_KEY_PREFIX: &str = "item";

/// Key for the tag catalog.
pub const TAGS_KEY: &str = "tags";

/// Key prefix for single tags (`tag:rust`).
pub const TAG_KEY_PREFIX: &str = "tag";

/// Key for the source list.
pub const SOURCES_KEY: &str = "sources";

/// Key prefix for single sources (`source:7`).
pub const SOURCE_KEY_PREFIX: &str = "source";

/// Separator between the parts of a cache key.
pub const KEY_SEPARATOR: char = ':';

/// Suffix marking an item list that includes done items.
pub const INCLUDE_DONE_SUFFIX: &str = "all";

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Delay before reconciling with the server after a confirmed optimistic write.
///
/// Gives server-side side effects (counters, feed filtering) time to land.
pub const DEFAULT_REVALIDATE_DELAY: Duration = Duration::from_millis(2000);
