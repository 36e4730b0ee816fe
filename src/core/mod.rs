//! Core computation for the water quality dashboard.
//!
//! This module contains:
//! - The reading model and field catalogue
//! - Window selection over a reading sequence
//! - Fixed-width bucket aggregation
//! - Timestamp parsing helpers

pub mod aggregate;
pub mod reading;
pub mod time;
pub mod windowing;

// Re-export commonly used types
pub use aggregate::{aggregate, bucket_start, AggregatedRow, AggregationWidth, BucketOrigin};
pub use reading::{Field, Measurements, Reading};
pub use time::parse_instant;
pub use windowing::{filter_window, select_window, TimeRange, Window};
