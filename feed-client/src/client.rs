//! Typed client over the sync engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument};

use feed_core::error::{FeedError, Result};
use feed_core::{
    mark_item_done, tag_catalog, CacheKey, FeedKey, ItemWithTags, KeyMatch, NewSource, NewTag,
    RequestSpec, Source, Tag, TimeWindow, TokenStore, Transport,
};
use feed_sync::{CacheEntry, CacheStats, MutateOptions, MutationHandle, Subscription, SyncEngine};

use crate::config::ClientConfig;
use crate::fetcher::{FeedFetcher, Payload};
use crate::token::MemoryTokenStore;
use crate::transport::HttpTransport;

/// Feed server client with a shared, self-refreshing cache.
///
/// Reads are served from the cache when fresh; writes update the cache
/// optimistically where the outcome is predictable.
#[derive(Clone)]
pub struct FeedClient {
    engine: SyncEngine<Payload>,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    config: ClientConfig,
}

impl FeedClient {
    /// Creates a client talking HTTP to the configured server.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_parts(config, transport, Arc::new(MemoryTokenStore::new())))
    }

    /// Creates a client over custom collaborators.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let fetcher = Arc::new(FeedFetcher::new(transport.clone(), tokens.clone()));
        let engine = SyncEngine::new(fetcher, config.engine_config());
        Self {
            engine,
            transport,
            tokens,
            config,
        }
    }

    /// Underlying engine.
    pub fn engine(&self) -> &SyncEngine<Payload> {
        &self.engine
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.engine.stats()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cached or freshly fetched value of `key`.
    pub async fn load(&self, key: &FeedKey) -> Result<Payload> {
        self.engine.load(&key.encode()).await
    }

    /// Bypasses the cache and refetches `key`.
    pub async fn refresh(&self, key: &FeedKey) -> Result<Payload> {
        self.engine.revalidate(&key.encode()).await
    }

    /// Items of the last `window` that are not done.
    pub async fn items(&self, window: TimeWindow) -> Result<Vec<ItemWithTags>> {
        self.load(&FeedKey::items(window)).await?.into_items()
    }

    /// Items of the last `window`, done ones included.
    pub async fn all_items(&self, window: TimeWindow) -> Result<Vec<ItemWithTags>> {
        let key = FeedKey::Items {
            window,
            include_done: true,
        };
        self.load(&key).await?.into_items()
    }

    /// One item.
    pub async fn item(&self, id: i64) -> Result<ItemWithTags> {
        self.load(&FeedKey::Item(id)).await?.into_item()
    }

    /// All tags.
    pub async fn tags(&self) -> Result<Vec<Tag>> {
        self.load(&FeedKey::Tags).await?.into_tags()
    }

    /// One tag.
    pub async fn tag(&self, name: &str) -> Result<Tag> {
        self.load(&FeedKey::Tag(name.to_string())).await?.into_tag()
    }

    /// Tags indexed by name.
    pub async fn tag_catalog(&self) -> Result<BTreeMap<String, Tag>> {
        Ok(tag_catalog(&self.tags().await?))
    }

    /// All sources.
    pub async fn sources(&self) -> Result<Vec<Source>> {
        self.load(&FeedKey::Sources).await?.into_sources()
    }

    /// One source.
    pub async fn source(&self, id: i64) -> Result<Source> {
        self.load(&FeedKey::Source(id)).await?.into_source()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SUBSCRIPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Watches `key`, fetching it if needed.
    pub fn subscribe<F>(&self, key: &FeedKey, callback: F) -> Subscription
    where
        F: Fn(&CacheEntry<Payload>) + Send + Sync + 'static,
    {
        self.engine.subscribe(&key.encode(), callback)
    }

    /// Watches the item feed of `window`.
    pub fn subscribe_items<F>(&self, window: TimeWindow, callback: F) -> Subscription
    where
        F: Fn(&CacheEntry<Payload>) + Send + Sync + 'static,
    {
        self.subscribe(&FeedKey::items(window), callback)
    }

    /// Watches the tag list.
    pub fn subscribe_tags<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CacheEntry<Payload>) + Send + Sync + 'static,
    {
        self.subscribe(&FeedKey::Tags, callback)
    }

    /// Watches the source list.
    pub fn subscribe_sources<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CacheEntry<Payload>) + Send + Sync + 'static,
    {
        self.subscribe(&FeedKey::Sources, callback)
    }

    /// Stops watching. An in-flight fetch still completes.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.engine.unsubscribe(subscription)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Marks item `id` done in the `window` feed.
    ///
    /// The cached feed shows the item as done immediately; the feed is
    /// refetched after the configured delay once the server confirms.
    pub fn mark_done(&self, window: TimeWindow, id: i64) -> Result<MutationHandle<()>> {
        let request = RequestSpec::post(["items".to_string(), id.to_string(), "done".to_string()]);
        let options = self
            .engine
            .reconcile()
            .invalidate(FeedKey::Item(id))
            .invalidate(FeedKey::Items {
                window,
                include_done: true,
            });
        self.write(
            &FeedKey::items(window).encode(),
            move |current| match current {
                Some(Payload::Items(items)) => mark_item_done(items, id).map(Payload::Items),
                _ => None,
            },
            request,
            options,
        )
    }

    /// Subscribes to a new source; the source list is refetched on success.
    pub fn create_source(&self, source: &NewSource) -> Result<MutationHandle<()>> {
        source.validate()?;
        let request = RequestSpec::post_json(["sources"], source.to_body()?);
        self.write(
            &FeedKey::Sources.encode(),
            |_| None,
            request,
            MutateOptions::new().invalidate(FeedKey::Sources),
        )
    }

    /// Removes source `id`, dropping it from the cached list immediately.
    pub fn delete_source(&self, id: i64) -> Result<MutationHandle<()>> {
        let request = RequestSpec::delete(["sources".to_string(), id.to_string()]);
        self.write(
            &FeedKey::Sources.encode(),
            move |current| match current {
                Some(Payload::Sources(sources)) => Some(Payload::Sources(
                    sources.iter().filter(|s| s.id != id).cloned().collect(),
                )),
                _ => None,
            },
            request,
            self.engine.reconcile().invalidate(FeedKey::Source(id)),
        )
    }

    /// Items a source would add, without subscribing to it. Not cached.
    #[instrument(skip(self))]
    pub async fn preview_source(&self, source: &NewSource) -> Result<Vec<ItemWithTags>> {
        source.validate()?;
        let token = self.token()?;
        let request = RequestSpec::post_json(["sources", "preview"], source.to_body()?)
            .with_token(Some(token.as_str()));
        let body = self.transport.send(request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Creates a tag; the tag list is refetched on success.
    pub fn create_tag(&self, tag: &NewTag) -> Result<MutationHandle<()>> {
        tag.validate()?;
        let request = RequestSpec::post_json(["tags"], serde_json::to_value(tag)?);
        self.write(
            &FeedKey::Tags.encode(),
            |_| None,
            request,
            MutateOptions::new().invalidate(FeedKey::Tags),
        )
    }

    /// Changes a tag's colours, updating the cached list immediately.
    pub fn update_tag(&self, tag: &NewTag) -> Result<MutationHandle<()>> {
        tag.validate()?;
        let request = RequestSpec::put_json(["tags"], serde_json::to_value(tag)?);
        let edit = tag.clone();
        self.write(
            &FeedKey::Tags.encode(),
            move |current| match current {
                Some(Payload::Tags(tags)) => Some(Payload::Tags(
                    tags.iter()
                        .cloned()
                        .map(|mut t| {
                            if t.name == edit.name {
                                t.apply(&edit);
                            }
                            t
                        })
                        .collect(),
                )),
                _ => None,
            },
            request,
            self.engine
                .reconcile()
                .invalidate(FeedKey::Tag(tag.name.clone())),
        )
    }

    /// Deletes a tag, dropping it from the cached list immediately.
    pub fn delete_tag(&self, name: &str) -> Result<MutationHandle<()>> {
        let request = RequestSpec::delete(["tags".to_string(), name.to_string()]);
        let owned = name.to_string();
        self.write(
            &FeedKey::Tags.encode(),
            move |current| match current {
                Some(Payload::Tags(tags)) => Some(Payload::Tags(
                    tags.iter().filter(|t| t.name != owned).cloned().collect(),
                )),
                _ => None,
            },
            request,
            self.engine
                .reconcile()
                .invalidate(FeedKey::all_item_feeds()),
        )
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // AUTH
    // ═══════════════════════════════════════════════════════════════════════════

    /// Checks `token` with the server and stores it if accepted.
    #[instrument(skip(self, token))]
    pub async fn login(&self, token: &str) -> Result<()> {
        let request = RequestSpec::post(["login"]).with_token(Some(token));
        self.transport.send(request).await?;
        self.tokens.set_token(Some(token.to_string()));
        info!("Logged in");
        self.engine.invalidate(KeyMatch::All);
        Ok(())
    }

    /// Forgets the stored token.
    pub fn logout(&self) {
        self.tokens.set_token(None);
        info!("Logged out");
    }

    /// True if a token is stored.
    pub fn is_authenticated(&self) -> bool {
        self.tokens.get_token().is_some()
    }

    fn token(&self) -> Result<String> {
        self.tokens.get_token().ok_or(FeedError::MissingToken)
    }

    /// Runs an authenticated write through the optimistic mutator.
    fn write<U>(
        &self,
        key: &CacheKey,
        updater: U,
        request: RequestSpec,
        options: MutateOptions,
    ) -> Result<MutationHandle<()>>
    where
        U: Fn(Option<&Payload>) -> Option<Payload> + Send + Sync + 'static,
    {
        let token = self.token()?;
        let request = request.with_token(Some(token.as_str()));
        let transport = self.transport.clone();
        Ok(self.engine.mutate(
            key,
            updater,
            move || async move { transport.send(request).await.map(|_| ()) },
            options,
        ))
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
