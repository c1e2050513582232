//! Feed items as served by `/api/items`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Image extensions worth rendering as a preview.
const PREVIEW_IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "webp", "png"];

/// Characters of the link shown when an item has no title.
const UNTITLED_LINK_CHARS: usize = 40;

/// A single entry pulled from a subscribed source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Server-assigned identifier
    pub id: i64,
    /// Link to the original article
    pub link: String,
    /// Article title
    #[serde(default)]
    pub title: Option<String>,
    /// Summary or body excerpt
    #[serde(default)]
    pub description: Option<String>,
    /// Author name
    #[serde(default)]
    pub author: Option<String>,
    /// Publication time reported by the source (UTC)
    #[serde(default)]
    pub published: Option<NaiveDateTime>,
    /// Link of the channel the item came from
    #[serde(default)]
    pub source_link: Option<String>,
    /// Preview image URL
    #[serde(default)]
    pub image: Option<String>,
    /// Whether the user starred the item
    #[serde(default)]
    pub favorite: bool,
    /// Whether the user marked the item done
    #[serde(default)]
    pub done: bool,
    /// When the server first stored the item (UTC)
    #[serde(default)]
    pub created_at: NaiveDateTime,
    /// Last server-side modification (UTC)
    #[serde(default)]
    pub updated_at: NaiveDateTime,
    /// Owning source, if still subscribed
    #[serde(default)]
    pub source_id: Option<i64>,
}

impl FeedItem {
    /// Title to display: the item title, or a truncated link.
    pub fn display_title(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => self.link.chars().take(UNTITLED_LINK_CHARS).collect(),
        }
    }

    /// Returns the image URL if it looks like something renderable.
    pub fn preview_image(&self) -> Option<&str> {
        let raw = self.image.as_deref()?;
        let parsed = url::Url::parse(raw).ok()?;
        let path = parsed.path().to_lowercase();
        let renderable = path.contains("image")
            || PREVIEW_IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext));
        renderable.then_some(raw)
    }
}

/// An item together with the names of its tags.
///
/// This is the row shape of the item feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemWithTags {
    /// The item itself (flattened on the wire)
    #[serde(flatten)]
    pub item: FeedItem,
    /// Tag names; the server may send an empty name for untagged items
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ItemWithTags {
    /// Item identifier.
    pub fn id(&self) -> i64 {
        self.item.id
    }

    /// Non-empty tag names.
    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str).filter(|name| !name.is_empty())
    }
}

/// Returns a copy of `items` with item `id` marked done.
///
/// Returns `None` if no such item is present.
pub fn mark_item_done(items: &[ItemWithTags], id: i64) -> Option<Vec<ItemWithTags>> {
    if !items.iter().any(|row| row.item.id == id) {
        return None;
    }
    Some(
        items
            .iter()
            .cloned()
            .map(|mut row| {
                if row.item.id == id {
                    row.item.done = true;
                }
                row
            })
            .collect(),
    )
}
