//! The dashboard pipeline: window selection, aggregation and presentation.
//!
//! Every request recomputes the whole pipeline from the current readings.
//! Nothing is cached between runs.

use crate::core::aggregate::{aggregate, AggregatedRow, AggregationWidth, BucketOrigin};
use crate::core::reading::{Field, Reading};
use crate::core::time::parse_instant;
use crate::core::windowing::{filter_window, select_window, TimeRange, Window};
use crate::export::{export, ExportDocument, ExportError, ExportFormat};
use crate::present::{latest_summary, to_series, to_table, ChartSeries, LatestSummary, TableView};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Settings that stay fixed for the lifetime of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub origin: BucketOrigin,
    pub tz: Tz,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            origin: BucketOrigin::LocalMidnight,
            tz: Tz::UTC,
        }
    }
}

/// Raw query-string parameters, as sent by the dashboard page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardParams {
    /// Comma-separated field keys
    pub params: Option<String>,
    /// Time range code or label
    pub range: Option<String>,
    /// Aggregation code or label
    pub aggregation: Option<String>,
    /// Custom range start
    pub start: Option<String>,
    /// Custom range end
    pub end: Option<String>,
    /// Export format
    pub format: Option<String>,
}

/// A parsed dashboard request.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardQuery {
    pub fields: Vec<Field>,
    pub range: TimeRange,
    pub width: AggregationWidth,
    pub custom_start: Option<DateTime<Utc>>,
    pub custom_end: Option<DateTime<Utc>>,
}

impl Default for DashboardQuery {
    fn default() -> Self {
        Self {
            fields: vec![Field::Ph],
            range: TimeRange::SixHours,
            width: AggregationWidth::TenMinutes,
            custom_start: None,
            custom_end: None,
        }
    }
}

impl DashboardQuery {
    /// Parse query parameters leniently.
    ///
    /// A missing `params` selects pH; an empty one selects nothing.
    /// Unparseable custom bounds are treated as missing.
    pub fn from_params(params: &DashboardParams, tz: Tz) -> Self {
        let fields = match params.params {
            Some(ref list) => Field::parse_list(list),
            None => vec![Field::Ph],
        };

        Self {
            fields,
            range: params
                .range
                .as_deref()
                .map(TimeRange::parse)
                .unwrap_or_default(),
            width: params
                .aggregation
                .as_deref()
                .map(AggregationWidth::parse)
                .unwrap_or_default(),
            custom_start: params.start.as_deref().and_then(|s| parse_instant(s, tz)),
            custom_end: params.end.as_deref().and_then(|s| parse_instant(s, tz)),
        }
    }
}

/// Everything the dashboard page renders for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub generated_at: DateTime<Utc>,
    /// Selected window; `None` when there were no readings
    pub window: Option<Window>,
    /// Readings available before windowing
    pub total_readings: usize,
    pub series: Vec<ChartSeries>,
    pub table: TableView,
    pub latest: LatestSummary,
}

impl DashboardView {
    /// The explicitly empty result: no series, no table, placeholder summaries.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            generated_at: now,
            window: None,
            total_readings: 0,
            series: Vec::new(),
            table: TableView::default(),
            latest: LatestSummary::placeholder(),
        }
    }

    /// Check if there is nothing to show.
    pub fn is_empty(&self) -> bool {
        self.total_readings == 0
    }
}

/// Window and aggregate readings for a query.
///
/// Returns the selected window (if any) and the aggregated rows.
pub fn aggregate_query(
    readings: &[Reading],
    query: &DashboardQuery,
    settings: &PipelineSettings,
) -> (Option<Window>, Vec<AggregatedRow>) {
    let Some(window) = select_window(readings, query.range, query.custom_start, query.custom_end)
    else {
        return (None, Vec::new());
    };

    let windowed = filter_window(readings, &window);
    let rows = aggregate(&windowed, query.width, settings.origin, settings.tz);
    (Some(window), rows)
}

/// Run the full pipeline for one request.
pub fn build_dashboard(
    readings: &[Reading],
    query: &DashboardQuery,
    settings: &PipelineSettings,
    now: DateTime<Utc>,
) -> DashboardView {
    if readings.is_empty() {
        return DashboardView::empty(now);
    }

    let (window, rows) = aggregate_query(readings, query, settings);

    DashboardView {
        generated_at: now,
        window,
        total_readings: readings.len(),
        series: to_series(&rows, &query.fields),
        table: to_table(&rows),
        latest: latest_summary(readings),
    }
}

/// Build an export document for a query.
///
/// Returns `Ok(None)` when there are no readings at all.
pub fn build_export(
    readings: &[Reading],
    query: &DashboardQuery,
    settings: &PipelineSettings,
    format: ExportFormat,
    now: DateTime<Utc>,
) -> Result<Option<ExportDocument>, ExportError> {
    if readings.is_empty() {
        return Ok(None);
    }

    let (_, rows) = aggregate_query(readings, query, settings);
    export(&rows, format, settings.tz, now).map(Some)
}
