//! Key codec: resource descriptors ⇄ cache keys ⇄ HTTP requests.
//!
//! Encoding is pure and deterministic. Dynamic parameters (the time window,
//! ids, tag names) are embedded in the key so that each parameter value is
//! its own cache entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{
    API_PREFIX, AUTH_HEADER, INCLUDE_DONE_SUFFIX, ITEMS_KEY_PREFIX, ITEM_KEY_PREFIX,
    JSON_CONTENT_TYPE, KEY_SEPARATOR, SOURCES_KEY, SOURCE_KEY_PREFIX, TAGS_KEY, TAG_KEY_PREFIX,
};
use crate::error::{FeedError, Result};
use crate::types::TimeWindow;

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE KEY
// ═══════════════════════════════════════════════════════════════════════════════

/// Canonical identifier of one cached resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps a raw key string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the key back into a resource descriptor.
    pub fn resource(&self) -> Result<FeedKey> {
        self.0.parse()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<FeedKey> for CacheKey {
    fn from(key: FeedKey) -> Self {
        key.encode()
    }
}

impl From<&FeedKey> for CacheKey {
    fn from(key: &FeedKey) -> Self {
        key.encode()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Logical identity of a readable resource on the feed server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FeedKey {
    /// Item feed for a time window
    Items {
        /// How far back to look
        window: TimeWindow,
        /// Whether done items are included
        include_done: bool,
    },
    /// A single item
    Item(i64),
    /// The tag catalog
    Tags,
    /// A single tag by name
    Tag(String),
    /// The source list
    Sources,
    /// A single source
    Source(i64),
}

impl FeedKey {
    /// Item feed for `window`, excluding done items.
    pub fn items(window: TimeWindow) -> Self {
        FeedKey::Items {
            window,
            include_done: false,
        }
    }

    /// Canonical cache key.
    pub fn encode(&self) -> CacheKey {
        let sep = KEY_SEPARATOR;
        let raw = match self {
            FeedKey::Items {
                window,
                include_done: false,
            } => format!("{ITEMS_KEY_PREFIX}{sep}{window}"),
            FeedKey::Items {
                window,
                include_done: true,
            } => format!("{ITEMS_KEY_PREFIX}{sep}{window}{sep}{INCLUDE_DONE_SUFFIX}"),
            FeedKey::Item(id) => format!("{ITEM_KEY_PREFIX}{sep}{id}"),
            FeedKey::Tags => TAGS_KEY.to_string(),
            FeedKey::Tag(name) => format!("{TAG_KEY_PREFIX}{sep}{name}"),
            FeedKey::Sources => SOURCES_KEY.to_string(),
            FeedKey::Source(id) => format!("{SOURCE_KEY_PREFIX}{sep}{id}"),
        };
        CacheKey(raw)
    }

    /// Read request that fetches this resource.
    ///
    /// The auth header is attached whenever a token is available.
    pub fn to_request(&self, token: Option<&str>) -> RequestSpec {
        let request = match self {
            FeedKey::Items {
                window,
                include_done,
            } => {
                let request = RequestSpec::get(["items"]).query("from_last", window.as_str());
                if *include_done {
                    request.query("include_done", "true")
                } else {
                    request
                }
            }
            FeedKey::Item(id) => RequestSpec::get(["items".to_string(), id.to_string()]),
            FeedKey::Tags => RequestSpec::get(["tags"]),
            FeedKey::Tag(name) => RequestSpec::get(["tags".to_string(), name.clone()]),
            FeedKey::Sources => RequestSpec::get(["sources"]),
            FeedKey::Source(id) => RequestSpec::get(["sources".to_string(), id.to_string()]),
        };
        request.with_token(token)
    }

    /// Matcher for every item-feed key regardless of window.
    pub fn all_item_feeds() -> KeyMatch {
        KeyMatch::Prefix(format!("{ITEMS_KEY_PREFIX}{KEY_SEPARATOR}"))
    }
}

impl FromStr for FeedKey {
    type Err = FeedError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || FeedError::InvalidKey(raw.to_string());
        let mut parts = raw.splitn(2, KEY_SEPARATOR);
        let head = parts.next().ok_or_else(invalid)?;
        let rest = parts.next();

        match (head, rest) {
            (TAGS_KEY, None) => Ok(FeedKey::Tags),
            (SOURCES_KEY, None) => Ok(FeedKey::Sources),
            (ITEMS_KEY_PREFIX, Some(rest)) => {
                let (window, include_done) = match rest.split_once(KEY_SEPARATOR) {
                    Some((window, INCLUDE_DONE_SUFFIX)) => (window, true),
                    Some(_) => return Err(invalid()),
                    None => (rest, false),
                };
                let window = window.parse().map_err(|_| invalid())?;
                Ok(FeedKey::Items {
                    window,
                    include_done,
                })
            }
            (ITEM_KEY_PREFIX, Some(id)) => id.parse().map(FeedKey::Item).map_err(|_| invalid()),
            (SOURCE_KEY_PREFIX, Some(id)) => id.parse().map(FeedKey::Source).map_err(|_| invalid()),
            (TAG_KEY_PREFIX, Some(name)) if !name.is_empty() => Ok(FeedKey::Tag(name.to_string())),
            _ => Err(invalid()),
        }
    }
}

/// Maps a cache key straight to its read request.
pub fn to_request(key: &CacheKey, token: Option<&str>) -> Result<RequestSpec> {
    Ok(key.resource()?.to_request(token))
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEY PREDICATES
// ═══════════════════════════════════════════════════════════════════════════════

/// Selects cache entries for invalidation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyMatch {
    /// Exactly one key
    Exact(CacheKey),
    /// Every key starting with the prefix
    Prefix(String),
    /// Every key
    All,
}

impl KeyMatch {
    /// Returns true if `key` is selected.
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyMatch::Exact(exact) => exact == key,
            KeyMatch::Prefix(prefix) => key.as_str().starts_with(prefix.as_str()),
            KeyMatch::All => true,
        }
    }
}

impl From<CacheKey> for KeyMatch {
    fn from(key: CacheKey) -> Self {
        KeyMatch::Exact(key)
    }
}

impl From<FeedKey> for KeyMatch {
    fn from(key: FeedKey) -> Self {
        KeyMatch::Exact(key.encode())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// HTTP method of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read
    Get,
    /// Create / action
    Post,
    /// Replace
    Put,
    /// Remove
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transport-agnostic description of one API request.
///
/// Paths are kept as segments and percent-encoded when the URL is built.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestSpec {
    /// HTTP method
    pub method: Method,
    /// Path segments below the API prefix
    pub segments: Vec<String>,
    /// Query parameters in order
    pub query: Vec<(String, String)>,
    /// Extra headers in order
    pub headers: Vec<(String, String)>,
    /// JSON body for writes
    pub body: Option<serde_json::Value>,
}

impl RequestSpec {
    fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A bodiless read.
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Get, segments)
    }

    /// A POST carrying `body` as JSON.
    pub fn post_json<I, S>(segments: I, body: serde_json::Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Post, segments).json(body)
    }

    /// A PUT carrying `body` as JSON.
    pub fn put_json<I, S>(segments: I, body: serde_json::Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Put, segments).json(body)
    }

    /// A bodiless POST (actions such as marking an item done).
    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Post, segments)
    }

    /// A DELETE.
    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Delete, segments)
    }

    /// Appends a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Appends a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self.header("content-type", JSON_CONTENT_TYPE)
    }

    /// Attaches the auth header when a token is present.
    pub fn with_token(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.header(AUTH_HEADER, token),
            None => self,
        }
    }

    /// Returns the value of header `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Path below the host, for logs (`/api/items?from_last=1w`).
    pub fn path(&self) -> String {
        let mut path = API_PREFIX.to_string();
        for segment in &self.segments {
            path.push('/');
            path.push_str(segment);
        }
        if !self.query.is_empty() {
            let pairs: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            path.push('?');
            path.push_str(&pairs.join("&"));
        }
        path
    }

    /// Absolute URL against the server's base URL.
    pub fn url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| FeedError::InvalidUrl(format!("{base} cannot be a base URL")))?;
            path.pop_if_empty();
            path.extend(API_PREFIX.trim_start_matches('/').split('/'));
            path.extend(self.segments.iter());
        }
        if self.query.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}
