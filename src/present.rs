//! Presentation of aggregated rows as chart series, table and summary cards.

use crate::core::aggregate::AggregatedRow;
use crate::core::reading::{Field, Measurements, Reading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder shown when a value is unavailable.
pub const PLACEHOLDER: &str = "--";

/// One point of a chart series. `y` is `None` for a gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub x: DateTime<Utc>,
    pub y: Option<f64>,
}

/// A line series for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub field: Field,
    /// Legend label, e.g. `TDS (ppm)`
    pub name: String,
    pub color: String,
    pub points: Vec<SeriesPoint>,
}

/// Build one series per selected field, in selection order.
///
/// A bucket where the field is missing becomes a gap, never zero.
pub fn to_series(rows: &[AggregatedRow], fields: &[Field]) -> Vec<ChartSeries> {
    fields
        .iter()
        .map(|&field| ChartSeries {
            field,
            name: field.label(),
            color: field.color().to_string(),
            points: rows
                .iter()
                .map(|row| SeriesPoint {
                    x: row.bucket_start,
                    y: row.mean(field),
                })
                .collect(),
        })
        .collect()
}

/// Table column descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub id: String,
    pub name: String,
}

/// One table row: the bucket start plus a cell per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub values: Measurements,
}

/// Tabular view of the aggregated rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableView {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
}

impl TableView {
    /// Column descriptors: `timestamp` followed by every field.
    pub fn standard_columns() -> Vec<TableColumn> {
        std::iter::once(TableColumn {
            id: "timestamp".to_string(),
            name: "timestamp".to_string(),
        })
        .chain(Field::ALL.iter().map(|f| TableColumn {
            id: f.key().to_string(),
            name: f.key().to_string(),
        }))
        .collect()
    }

    /// Check if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Build the table, preserving bucket order.
pub fn to_table(rows: &[AggregatedRow]) -> TableView {
    TableView {
        columns: TableView::standard_columns(),
        rows: rows
            .iter()
            .map(|row| TableRow {
                timestamp: row.bucket_start,
                values: row.values,
            })
            .collect(),
    }
}

/// One summary card value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryValue {
    pub field: Field,
    pub name: String,
    pub unit: String,
    /// Two-decimal value or the placeholder
    pub value: String,
}

/// Latest-value summary cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestSummary {
    /// Timestamp of the reading the values came from
    pub timestamp: Option<DateTime<Utc>>,
    pub values: Vec<SummaryValue>,
}

impl LatestSummary {
    /// Formatted value for a field.
    pub fn get(&self, field: Field) -> &str {
        self.values
            .iter()
            .find(|v| v.field == field)
            .map(|v| v.value.as_str())
            .unwrap_or(PLACEHOLDER)
    }

    /// Summary with every value set to the placeholder.
    pub fn placeholder() -> Self {
        Self::from_reading(None)
    }

    fn from_reading(reading: Option<&Reading>) -> Self {
        let values = Field::ALL
            .iter()
            .map(|&field| SummaryValue {
                field,
                name: field.name().to_string(),
                unit: field.unit().to_string(),
                value: reading
                    .and_then(|r| r.value(field))
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| PLACEHOLDER.to_string()),
            })
            .collect();

        Self {
            timestamp: reading.map(|r| r.timestamp),
            values,
        }
    }
}

/// Summaries from the newest raw reading of the full, unwindowed sequence.
pub fn latest_summary(readings: &[Reading]) -> LatestSummary {
    let latest = readings.iter().max_by_key(|r| r.timestamp);
    LatestSummary::from_reading(latest)
}
