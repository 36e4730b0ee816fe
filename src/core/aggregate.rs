//! Fixed-width bucket aggregation.
//!
//! Readings are grouped into half-open buckets `[start, start + width)`
//! anchored at a [`BucketOrigin`], and each field is averaged over the
//! readings in the bucket that carry a value for it.

use crate::core::reading::{Field, Measurements, Reading};
use crate::core::time::local_to_utc;
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bucket widths offered by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregationWidth {
    #[serde(rename = "10T")]
    #[default]
    TenMinutes,
    #[serde(rename = "30T")]
    ThirtyMinutes,
    #[serde(rename = "H")]
    OneHour,
    #[serde(rename = "4H")]
    FourHours,
    #[serde(rename = "D")]
    Daily,
}

impl AggregationWidth {
    /// All widths in display order.
    pub const ALL: [AggregationWidth; 5] = [
        AggregationWidth::TenMinutes,
        AggregationWidth::ThirtyMinutes,
        AggregationWidth::OneHour,
        AggregationWidth::FourHours,
        AggregationWidth::Daily,
    ];

    /// Short code used in queries.
    pub fn code(&self) -> &'static str {
        match self {
            AggregationWidth::TenMinutes => "10T",
            AggregationWidth::ThirtyMinutes => "30T",
            AggregationWidth::OneHour => "H",
            AggregationWidth::FourHours => "4H",
            AggregationWidth::Daily => "D",
        }
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            AggregationWidth::TenMinutes => "10 Min",
            AggregationWidth::ThirtyMinutes => "30 Min",
            AggregationWidth::OneHour => "1 Hour",
            AggregationWidth::FourHours => "4 Hour",
            AggregationWidth::Daily => "Daily",
        }
    }

    /// Bucket width.
    pub fn duration(&self) -> Duration {
        match self {
            AggregationWidth::TenMinutes => Duration::minutes(10),
            AggregationWidth::ThirtyMinutes => Duration::minutes(30),
            AggregationWidth::OneHour => Duration::hours(1),
            AggregationWidth::FourHours => Duration::hours(4),
            AggregationWidth::Daily => Duration::days(1),
        }
    }

    /// Parse a code or label. Unknown input falls back to ten minutes.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        AggregationWidth::ALL
            .into_iter()
            .find(|w| w.code().eq_ignore_ascii_case(s) || w.label().eq_ignore_ascii_case(s))
            .unwrap_or_default()
    }
}

/// Where bucket boundaries are anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketOrigin {
    /// Multiples of the width since 1970-01-01T00:00:00Z.
    Epoch,
    /// Multiples of the width since local midnight of the reading's day.
    #[default]
    LocalMidnight,
}

/// One bucket of averaged readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    /// Inclusive start of the bucket
    pub bucket_start: DateTime<Utc>,
    /// Number of readings that fell into the bucket (always at least 1)
    pub reading_count: usize,
    /// Per-field means; missing when no reading in the bucket had the field
    #[serde(flatten)]
    pub values: Measurements,
}

impl AggregatedRow {
    /// Mean of a field in this bucket.
    pub fn mean(&self, field: Field) -> Option<f64> {
        self.values.get(field)
    }
}

/// Compute the start of the bucket containing `timestamp`.
///
/// With [`BucketOrigin::LocalMidnight`] buckets are floored on the local
/// wall clock, so a daily bucket always covers one calendar day even when a
/// DST transition makes that day 23 or 25 hours long.
pub fn bucket_start(
    timestamp: DateTime<Utc>,
    width: AggregationWidth,
    origin: BucketOrigin,
    tz: Tz,
) -> DateTime<Utc> {
    let width_ms = width.duration().num_milliseconds();

    match origin {
        BucketOrigin::Epoch => {
            let ms = timestamp.timestamp_millis();
            DateTime::from_timestamp_millis(ms.div_euclid(width_ms) * width_ms)
                .unwrap_or(timestamp)
        }
        BucketOrigin::LocalMidnight => {
            let local = timestamp.with_timezone(&tz).naive_local();
            let midnight = local.date().and_time(NaiveTime::MIN);
            let offset_ms = (local - midnight).num_milliseconds();
            let floor_ms = offset_ms.div_euclid(width_ms) * width_ms;
            resolve_local_floor(midnight + Duration::milliseconds(floor_ms), timestamp, tz)
        }
    }
}

/// Map a floored wall-clock time back to UTC.
///
/// Inside a DST fold the wall time occurs twice; the later occurrence is
/// used when it does not pass `timestamp`, so the bucket still contains it.
fn resolve_local_floor(floor: NaiveDateTime, timestamp: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&floor) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(early, late) => {
            let late = late.with_timezone(&Utc);
            if late <= timestamp {
                late
            } else {
                early.with_timezone(&Utc)
            }
        }
        LocalResult::None => local_to_utc(floor, tz)
            .map(|dt| dt.min(timestamp))
            .unwrap_or(timestamp),
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FieldAccumulator {
    sum: f64,
    count: usize,
}

impl FieldAccumulator {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

#[derive(Debug, Default)]
struct BucketAccumulator {
    readings: usize,
    fields: [FieldAccumulator; 4],
}

impl BucketAccumulator {
    fn add(&mut self, reading: &Reading) {
        self.readings += 1;
        for (acc, field) in self.fields.iter_mut().zip(Field::ALL) {
            if let Some(value) = reading.value(field) {
                acc.add(value);
            }
        }
    }

    fn finish(self, bucket_start: DateTime<Utc>) -> AggregatedRow {
        let mut values = Measurements::default();
        for (acc, field) in self.fields.iter().zip(Field::ALL) {
            values.set(field, acc.mean());
        }
        AggregatedRow {
            bucket_start,
            reading_count: self.readings,
            values,
        }
    }
}

/// Group readings into buckets and average each field.
///
/// Output is ordered by bucket start, ascending. Buckets without readings
/// are not emitted, and input order does not matter.
pub fn aggregate(
    readings: &[Reading],
    width: AggregationWidth,
    origin: BucketOrigin,
    tz: Tz,
) -> Vec<AggregatedRow> {
    let mut buckets: BTreeMap<DateTime<Utc>, BucketAccumulator> = BTreeMap::new();

    for reading in readings {
        let start = bucket_start(reading.timestamp, width, origin, tz);
        buckets.entry(start).or_default().add(reading);
    }

    buckets
        .into_iter()
        .map(|(start, acc)| acc.finish(start))
        .collect()
}
