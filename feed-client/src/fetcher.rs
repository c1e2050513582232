//! Decoded server payloads and the loader that produces them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use feed_core::error::{FeedError, Result};
use feed_core::{CacheKey, FeedKey, Fetcher, ItemWithTags, Source, Tag, TokenStore, Transport};

/// Value cached under one key; the variant follows the key's resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// `items:<window>[:all]`
    Items(Vec<ItemWithTags>),
    /// `item:<id>`
    Item(ItemWithTags),
    /// `tags`
    Tags(Vec<Tag>),
    /// `tag:<name>`
    Tag(Tag),
    /// `sources`
    Sources(Vec<Source>),
    /// `source:<id>`
    Source(Source),
}

impl Payload {
    /// Decodes a response body for the resource named by `key`.
    pub fn decode(key: &FeedKey, body: &[u8]) -> Result<Self> {
        let payload = match key {
            FeedKey::Items { .. } => Payload::Items(serde_json::from_slice(body)?),
            FeedKey::Item(_) => Payload::Item(serde_json::from_slice(body)?),
            FeedKey::Tags => Payload::Tags(serde_json::from_slice(body)?),
            FeedKey::Tag(_) => Payload::Tag(serde_json::from_slice(body)?),
            FeedKey::Sources => Payload::Sources(serde_json::from_slice(body)?),
            FeedKey::Source(_) => Payload::Source(serde_json::from_slice(body)?),
        };
        Ok(payload)
    }

    /// Item list, if this is one.
    pub fn as_items(&self) -> Option<&[ItemWithTags]> {
        match self {
            Payload::Items(items) => Some(items),
            _ => None,
        }
    }

    /// Tag list, if this is one.
    pub fn as_tags(&self) -> Option<&[Tag]> {
        match self {
            Payload::Tags(tags) => Some(tags),
            _ => None,
        }
    }

    /// Source list, if this is one.
    pub fn as_sources(&self) -> Option<&[Source]> {
        match self {
            Payload::Sources(sources) => Some(sources),
            _ => None,
        }
    }

    /// Unwraps an item list.
    pub fn into_items(self) -> Result<Vec<ItemWithTags>> {
        match self {
            Payload::Items(items) => Ok(items),
            other => Err(mismatch("item list", &other)),
        }
    }

    /// Unwraps a single item.
    pub fn into_item(self) -> Result<ItemWithTags> {
        match self {
            Payload::Item(item) => Ok(item),
            other => Err(mismatch("item", &other)),
        }
    }

    /// Unwraps a tag list.
    pub fn into_tags(self) -> Result<Vec<Tag>> {
        match self {
            Payload::Tags(tags) => Ok(tags),
            other => Err(mismatch("tag list", &other)),
        }
    }

    /// Unwraps a single tag.
    pub fn into_tag(self) -> Result<Tag> {
        match self {
            Payload::Tag(tag) => Ok(tag),
            other => Err(mismatch("tag", &other)),
        }
    }

    /// Unwraps a source list.
    pub fn into_sources(self) -> Result<Vec<Source>> {
        match self {
            Payload::Sources(sources) => Ok(sources),
            other => Err(mismatch("source list", &other)),
        }
    }

    /// Unwraps a single source.
    pub fn into_source(self) -> Result<Source> {
        match self {
            Payload::Source(source) => Ok(source),
            other => Err(mismatch("source", &other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Payload::Items(_) => "item list",
            Payload::Item(_) => "item",
            Payload::Tags(_) => "tag list",
            Payload::Tag(_) => "tag",
            Payload::Sources(_) => "source list",
            Payload::Source(_) => "source",
        }
    }
}

fn mismatch(expected: &str, found: &Payload) -> FeedError {
    FeedError::InternalError(format!("expected {expected}, cached value is a {}", found.kind()))
}

/// Loads any cache key from the server.
pub struct FeedFetcher {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
}

impl FeedFetcher {
    /// Creates a fetcher sending through `transport` with tokens from `tokens`.
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenStore>) -> Self {
        Self { transport, tokens }
    }
}

#[async_trait]
impl Fetcher<Payload> for FeedFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, key: &CacheKey) -> Result<Payload> {
        let resource = key.resource()?;
        let request = resource.to_request(self.tokens.get_token().as_deref());
        let body = self.transport.send(request).await?;
        let payload = Payload::decode(&resource, &body)?;
        debug!(%key, kind = payload.kind(), "Fetched");
        Ok(payload)
    }
}
