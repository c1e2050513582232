//! Tags and the tag catalog.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

/// A named label with display colours.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Unique tag name (primary key)
    pub name: String,
    /// CSS background colour
    #[serde(default)]
    pub background_color: Option<String>,
    /// CSS text colour
    #[serde(default)]
    pub text_color: Option<String>,
    /// CSS border colour
    #[serde(default)]
    pub border_color: Option<String>,
    /// Creation time (UTC)
    #[serde(default)]
    pub created_at: NaiveDateTime,
    /// Last modification (UTC)
    #[serde(default)]
    pub updated_at: NaiveDateTime,
}

impl Tag {
    /// Copies the colours of `edit` onto this tag.
    pub fn apply(&mut self, edit: &NewTag) {
        self.background_color = edit.background_color.clone();
        self.text_color = edit.text_color.clone();
        self.border_color = edit.border_color.clone();
    }
}

/// Body for creating a tag or updating its colours.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTag {
    /// Tag name
    pub name: String,
    /// CSS background colour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    /// CSS text colour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    /// CSS border colour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
}

impl NewTag {
    /// Creates a tag body with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the background colour.
    pub fn background(mut self, color: impl Into<String>) -> Self {
        self.background_color = Some(color.into());
        self
    }

    /// Sets the text colour.
    pub fn text(mut self, color: impl Into<String>) -> Self {
        self.text_color = Some(color.into());
        self
    }

    /// Sets the border colour.
    pub fn border(mut self, color: impl Into<String>) -> Self {
        self.border_color = Some(color.into());
        self
    }

    /// Checks the body before it is sent.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FeedError::ValidationError("tag name cannot be empty".into()));
        }
        Ok(())
    }

    /// Builds the tag as it will appear in the catalog before the server confirms.
    pub fn to_tag(&self) -> Tag {
        Tag {
            name: self.name.clone(),
            background_color: self.background_color.clone(),
            text_color: self.text_color.clone(),
            border_color: self.border_color.clone(),
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
        }
    }
}

/// Indexes tags by name for lookup while rendering items.
pub fn tag_catalog(tags: &[Tag]) -> BTreeMap<String, Tag> {
    tags.iter().map(|tag| (tag.name.clone(), tag.clone())).collect()
}
