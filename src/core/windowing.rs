//! Time window selection.
//!
//! A window is an inclusive `[start, end]` bound chosen either from a named
//! range ending at the newest reading, or from explicit custom bounds.

use crate::core::reading::Reading;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Named time ranges offered by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1H")]
    OneHour,
    #[serde(rename = "6H")]
    #[default]
    SixHours,
    #[serde(rename = "12H")]
    TwelveHours,
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "1W")]
    OneWeek,
    #[serde(rename = "Custom")]
    Custom,
}

impl TimeRange {
    /// All ranges in display order.
    pub const ALL: [TimeRange; 6] = [
        TimeRange::OneHour,
        TimeRange::SixHours,
        TimeRange::TwelveHours,
        TimeRange::OneDay,
        TimeRange::OneWeek,
        TimeRange::Custom,
    ];

    /// Short code used in queries.
    pub fn code(&self) -> &'static str {
        match self {
            TimeRange::OneHour => "1H",
            TimeRange::SixHours => "6H",
            TimeRange::TwelveHours => "12H",
            TimeRange::OneDay => "1D",
            TimeRange::OneWeek => "1W",
            TimeRange::Custom => "Custom",
        }
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            TimeRange::OneHour => "1 Hour",
            TimeRange::SixHours => "6 Hours",
            TimeRange::TwelveHours => "12 Hours",
            TimeRange::OneDay => "1 Day",
            TimeRange::OneWeek => "1 Week",
            TimeRange::Custom => "Custom Range",
        }
    }

    /// Length of a named range. `None` for `Custom`.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            TimeRange::OneHour => Some(Duration::hours(1)),
            TimeRange::SixHours => Some(Duration::hours(6)),
            TimeRange::TwelveHours => Some(Duration::hours(12)),
            TimeRange::OneDay => Some(Duration::hours(24)),
            TimeRange::OneWeek => Some(Duration::hours(168)),
            TimeRange::Custom => None,
        }
    }

    /// Parse a code or label. Unknown input falls back to six hours.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        TimeRange::ALL
            .into_iter()
            .find(|r| r.code().eq_ignore_ascii_case(s) || r.label().eq_ignore_ascii_case(s))
            .unwrap_or_default()
    }
}

/// Inclusive time bound applied before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Create a window. `start > end` is allowed and selects nothing.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// A window that selects nothing.
    pub fn empty() -> Self {
        Self {
            start: DateTime::<Utc>::MAX_UTC,
            end: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Check if a timestamp falls within this window (both ends inclusive).
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    /// Check if the window can select anything at all.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

/// Compute the window for a range selection.
///
/// Returns `None` when there are no readings; callers short-circuit to an
/// empty result instead of computing a window. A custom range with a missing
/// bound yields [`Window::empty`].
pub fn select_window(
    readings: &[Reading],
    range: TimeRange,
    custom_start: Option<DateTime<Utc>>,
    custom_end: Option<DateTime<Utc>>,
) -> Option<Window> {
    let latest = readings.iter().map(|r| r.timestamp).max()?;

    let window = match range.duration() {
        Some(duration) => Window::new(latest - duration, latest),
        None => match (custom_start, custom_end) {
            (Some(start), Some(end)) => Window::new(start, end),
            _ => Window::empty(),
        },
    };

    Some(window)
}

/// Keep the readings inside the window, preserving order.
pub fn filter_window(readings: &[Reading], window: &Window) -> Vec<Reading> {
    readings
        .iter()
        .filter(|r| window.contains(r.timestamp))
        .cloned()
        .collect()
}
