//! Domain types for my-feed.
//!
//! - [`TimeWindow`]: How far back the item feed reaches
//! - [`ItemWithTags`]: A feed row (item plus tag names)
//! - [`Tag`]: A coloured label
//! - [`Source`]: A polled channel

mod item;
mod source;
mod tag;
mod window;

pub use item::*;
pub use source::*;
pub use tag::*;
pub use window::*;
