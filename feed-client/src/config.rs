//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use feed_core::error::{FeedError, Result};
use feed_core::{TimeWindow, DEFAULT_BASE_URL, DEFAULT_REVALIDATE_DELAY, DEFAULT_TIMEOUT_SECONDS};
use feed_sync::EngineConfig;

/// Connection and synchronization settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server origin; the `/api` prefix is appended per request
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Delay before a confirmed mutation is reconciled with the server
    pub revalidate_delay_ms: u64,
    /// Window used when none is given
    pub default_window: TimeWindow,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            revalidate_delay_ms: DEFAULT_REVALIDATE_DELAY.as_millis() as u64,
            default_window: TimeWindow::default(),
        }
    }
}

impl ClientConfig {
    /// Creates config for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Loads `.env` and reads `FEED_*` variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds config from a variable lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("FEED_BASE_URL") {
            config.base_url = url;
        }
        if let Some(raw) = lookup("FEED_TIMEOUT_SECONDS") {
            config.timeout_seconds = parse_number("FEED_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("FEED_REVALIDATE_DELAY_MS") {
            config.revalidate_delay_ms = parse_number("FEED_REVALIDATE_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("FEED_WINDOW") {
            config.default_window = raw.parse()?;
        }

        config.base_url()?;
        Ok(config)
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the post-mutation revalidation delay.
    pub fn with_revalidate_delay(mut self, delay: Duration) -> Self {
        self.revalidate_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the default window.
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.default_window = window;
        self
    }

    /// Parsed server origin.
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)?;
        if url.cannot_be_a_base() {
            return Err(FeedError::InvalidUrl(format!(
                "{} cannot be a base URL",
                self.base_url
            )));
        }
        Ok(url)
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Post-mutation revalidation delay.
    pub fn revalidate_delay(&self) -> Duration {
        Duration::from_millis(self.revalidate_delay_ms)
    }

    /// Settings for the sync engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_revalidate_delay(self.revalidate_delay())
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| FeedError::ConfigError(format!("{name} must be a non-negative integer, got {raw:?}")))
}
