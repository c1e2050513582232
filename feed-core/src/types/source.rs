//! Subscribed sources (RSS/Atom channels).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

/// A channel the server polls for new items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Server-assigned identifier
    pub id: i64,
    /// Display name
    pub name: String,
    /// Channel URL
    pub url: String,
    /// Publication time of the newest item seen (UTC)
    #[serde(default)]
    pub last_pub: NaiveDateTime,
    /// Last successful poll (UTC)
    #[serde(default)]
    pub last_poll: Option<NaiveDateTime>,
    /// Channel-advertised polling interval in minutes
    #[serde(default)]
    pub ttl: Option<i64>,
    /// Whether the user starred the source
    #[serde(default)]
    pub favorite: bool,
    /// Creation time (UTC)
    #[serde(default)]
    pub created_at: NaiveDateTime,
    /// Last modification (UTC)
    #[serde(default)]
    pub updated_at: NaiveDateTime,
}

/// Input for creating (or previewing) a source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSource {
    /// Display name
    pub name: String,
    /// Channel URL
    pub url: String,
    /// Ignore items published before this time (UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_date: Option<NaiveDateTime>,
}

/// Wire body: the server decodes a full `Source` and requires an id.
#[derive(Serialize)]
struct SourceDraft<'a> {
    id: i64,
    name: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_date: Option<NaiveDateTime>,
    favorite: bool,
    last_poll: Option<NaiveDateTime>,
    ttl: Option<i64>,
}

impl NewSource {
    /// Creates a new source input.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            min_date: None,
        }
    }

    /// Sets the minimum publication date.
    pub fn min_date(mut self, min_date: NaiveDateTime) -> Self {
        self.min_date = Some(min_date);
        self
    }

    /// Checks that both name and URL are present and the URL parses.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FeedError::ValidationError("source name cannot be empty".into()));
        }
        if self.url.trim().is_empty() {
            return Err(FeedError::ValidationError("source url cannot be empty".into()));
        }
        url::Url::parse(self.url.trim())?;
        Ok(())
    }

    /// JSON body expected by `POST /sources` and `POST /sources/preview`.
    pub fn to_body(&self) -> Result<serde_json::Value> {
        let draft = SourceDraft {
            id: 0,
            name: self.name.trim(),
            url: self.url.trim(),
            min_date: self.min_date,
            favorite: false,
            last_poll: None,
            ttl: None,
        };
        Ok(serde_json::to_value(draft)?)
    }
}
