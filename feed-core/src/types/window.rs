//! Sliding time window used to select the item feed.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

const DAY: u64 = 24 * 60 * 60;

/// How far back the item feed reaches.
///
/// The window is part of the item-list cache key, so switching windows
/// selects a different cache entry instead of mutating the current one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeWindow {
    /// Items from the past day
    #[serde(rename = "1d")]
    OneDay,
    /// Items from the past two days
    #[serde(rename = "2d")]
    TwoDays,
    /// Items from the past three days
    #[serde(rename = "3d")]
    ThreeDays,
    /// Items from the past week
    #[default]
    #[serde(rename = "1w")]
    OneWeek,
}

impl TimeWindow {
    /// All selectable windows, shortest first.
    pub const ALL: [TimeWindow; 4] = [
        TimeWindow::OneDay,
        TimeWindow::TwoDays,
        TimeWindow::ThreeDays,
        TimeWindow::OneWeek,
    ];

    /// Wire form used in cache keys and the `from_last` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::OneDay => "1d",
            TimeWindow::TwoDays => "2d",
            TimeWindow::ThreeDays => "3d",
            TimeWindow::OneWeek => "1w",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            TimeWindow::OneDay => "Past Day",
            TimeWindow::TwoDays => "Past 2 Days",
            TimeWindow::ThreeDays => "Past 3 Days",
            TimeWindow::OneWeek => "Past Week",
        }
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        let days = match self {
            TimeWindow::OneDay => 1,
            TimeWindow::TwoDays => 2,
            TimeWindow::ThreeDays => 3,
            TimeWindow::OneWeek => 7,
        };
        Duration::from_secs(days * DAY)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1d" => Ok(TimeWindow::OneDay),
            "2d" => Ok(TimeWindow::TwoDays),
            "3d" => Ok(TimeWindow::ThreeDays),
            "1w" | "7d" => Ok(TimeWindow::OneWeek),
            _ => Err(FeedError::InvalidTimeWindow(s.to_string())),
        }
    }
}
