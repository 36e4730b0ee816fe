//! Water Quality Dashboard - time-window aggregation over sensor readings.
//!
//! This library polls an upstream sensor API for pH, TDS, water level and
//! flow readings, keeps them in a store, and turns them into charts, tables
//! and spreadsheet exports over a selected time window.
//!
//! # Pipeline
//!
//! - **Window**: pick the sub-range to show (last 1H..1W, or a custom range)
//! - **Aggregate**: average each field over fixed-width buckets
//! - **Present**: chart series with gaps, a table, latest-value cards
//!
//! Every request recomputes the pipeline from the store; aggregated rows are
//! never persisted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Water Quality Dashboard                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Fetcher   │──▶│    Store    │──▶│  Windowing  │       │
//! │  │ (upstream)  │   │ (retention) │   │ (1H .. 1W)  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                                    │              │
//! │         ▼                                    ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Activity   │   │  Present /  │◀──│  Aggregate  │       │
//! │  │    Log      │   │   Export    │   │  (buckets)  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use water_quality_dashboard::{
//!     build_dashboard, DashboardQuery, Field, Measurements, PipelineSettings, Reading,
//! };
//!
//! let readings = vec![Reading::new(
//!     Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
//!     Measurements::default().with(Field::Ph, 7.2),
//! )];
//!
//! let view = build_dashboard(
//!     &readings,
//!     &DashboardQuery::default(),
//!     &PipelineSettings::default(),
//!     Utc::now(),
//! );
//! assert_eq!(view.latest.get(Field::Ph), "7.20");
//! ```

pub mod activity;
pub mod config;
pub mod core;
pub mod dashboard;
pub mod export;
pub mod present;
pub mod store;

#[cfg(feature = "fetch")]
pub mod fetcher;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use activity::{ActivityLog, ActivityStats, SharedActivityLog};
pub use config::{Config, ConfigError};
pub use crate::core::{
    AggregatedRow, AggregationWidth, BucketOrigin, Field, Measurements, Reading, TimeRange, Window,
};
pub use dashboard::{
    build_dashboard, build_export, DashboardParams, DashboardQuery, DashboardView,
    PipelineSettings,
};
pub use export::{ExportDocument, ExportError, ExportFormat};
pub use present::{ChartSeries, LatestSummary, TableView, PLACEHOLDER};
pub use store::{create_shared_store, ReadingStore, RetentionPolicy, SharedStore};

// Fetcher re-exports (when enabled)
#[cfg(feature = "fetch")]
pub use fetcher::{FetchError, Fetcher, FetcherConfig, RefreshSummary};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_catalogue_is_complete() {
        let keys: Vec<&str> = Field::ALL.iter().map(|f| f.key()).collect();
        assert_eq!(keys, vec!["pH", "TDS", "Depth", "FlowInd"]);
        assert!(!VERSION.is_empty());
    }
}
