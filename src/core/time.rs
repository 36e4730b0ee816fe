//! Timestamp parsing and calendar helpers.
//!
//! Naive timestamps and plain dates are interpreted in the configured
//! timezone, then normalized to UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Accepted naive date-time layouts, tried in order.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an instant from an RFC 3339 string, a naive date-time or a date.
///
/// Returns `None` for empty or unrecognized input.
pub fn parse_instant(s: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return local_to_utc(naive, tz);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| local_to_utc(naive, tz))
}

/// Convert a local wall-clock time to UTC.
///
/// Ambiguous times (DST fold) resolve to the earlier instant; times inside a
/// DST gap are shifted forward by an hour.
pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

/// Local midnight of the calendar day containing `instant`.
pub fn local_midnight(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let date = instant.with_timezone(&tz).date_naive();
    start_of_day(date, tz).unwrap_or(instant)
}

/// First instant of a local calendar day.
pub fn start_of_day(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|naive| local_to_utc(naive, tz))
}

/// Format an instant in the given timezone.
pub fn format_local(instant: DateTime<Utc>, tz: Tz, format: &str) -> String {
    instant.with_timezone(&tz).format(format).to_string()
}
