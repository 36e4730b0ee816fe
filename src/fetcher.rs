//! Client for the upstream sensor API.
//!
//! The fetcher pulls the current reading log over HTTP, normalizes the wire
//! format into [`Reading`]s and merges them into the store. A failed fetch
//! leaves the store untouched; the next refresh tick is the only retry.

use crate::activity::ActivityLog;
use crate::config::Config;
use crate::core::reading::{Field, Measurements, Reading};
use crate::core::time::parse_instant;
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Full URL of the readings endpoint
    pub url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Timezone for naive upstream timestamps
    pub tz: Tz,
}

impl FetcherConfig {
    /// Create a new fetcher configuration.
    pub fn new(url: impl Into<String>, tz: Tz) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            tz,
        }
    }

    /// Build from the service configuration.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let tz = config
            .tz()
            .map_err(|e| FetchError::Config(e.to_string()))?;
        Ok(Self {
            url: config.api_url(),
            timeout: config.request_timeout,
            tz,
        })
    }
}

/// Fetch error types.
#[derive(Debug)]
pub enum FetchError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Upstream returned an error response
    Server { status: u16, message: String },
    /// Response body could not be decoded
    Serialization(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Config(msg) => write!(f, "Fetch config error: {msg}"),
            FetchError::Network(msg) => write!(f, "Fetch network error: {msg}"),
            FetchError::Server { status, message } => {
                write!(f, "Upstream server error ({status}): {message}")
            }
            FetchError::Serialization(msg) => write!(f, "Fetch decode error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Upstream response body: a bare array or an object with a `data` array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiResponse {
    Rows(Vec<ApiReading>),
    Wrapped { data: Vec<ApiReading> },
}

impl ApiResponse {
    fn into_rows(self) -> Vec<ApiReading> {
        match self {
            ApiResponse::Rows(rows) | ApiResponse::Wrapped { data: rows } => rows,
        }
    }
}

/// One reading as returned by the upstream API (wire format).
///
/// Mirrors the JSON payload; unknown keys such as `_id` are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiReading {
    /// RFC 3339 or naive string, epoch number, or `{"$date": ...}`
    #[serde(default, alias = "Timestamp", alias = "time")]
    pub timestamp: serde_json::Value,
    #[serde(default, rename = "pH", alias = "ph", alias = "PH", deserialize_with = "lenient_f64")]
    pub ph: Option<f64>,
    #[serde(default, rename = "TDS", alias = "tds", deserialize_with = "lenient_f64")]
    pub tds: Option<f64>,
    #[serde(default, rename = "Depth", alias = "depth", deserialize_with = "lenient_f64")]
    pub depth: Option<f64>,
    #[serde(default, rename = "FlowInd", alias = "flowind", alias = "flow_ind", deserialize_with = "lenient_f64")]
    pub flow_ind: Option<f64>,
}

impl ApiReading {
    /// Normalize into a [`Reading`]. Returns `None` when the timestamp is unusable.
    pub fn into_reading(self, tz: Tz) -> Option<Reading> {
        let timestamp = parse_wire_timestamp(&self.timestamp, tz)?;

        let mut values = Measurements::default();
        values.set(Field::Ph, self.ph);
        values.set(Field::Tds, self.tds);
        values.set(Field::Depth, self.depth);
        values.set(Field::FlowInd, self.flow_ind);

        Some(Reading::new(timestamp, values))
    }
}

/// Accept numbers, numeric strings, or null.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Epoch numbers above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

fn parse_wire_timestamp(value: &serde_json::Value, tz: Tz) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_instant(s, tz),
        serde_json::Value::Number(n) => {
            let n = n.as_f64()?;
            let millis = if n.abs() >= EPOCH_MILLIS_THRESHOLD {
                n
            } else {
                n * 1000.0
            };
            DateTime::from_timestamp_millis(millis as i64)
        }
        serde_json::Value::Object(map) => map
            .get("$date")
            .and_then(|inner| parse_wire_timestamp(inner, tz)),
        _ => None,
    }
}

/// Decode an upstream response body into readings sorted by timestamp.
pub fn parse_body(body: &str, tz: Tz) -> Result<Vec<Reading>, FetchError> {
    let response: ApiResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Serialization(e.to_string()))?;

    let rows = response.into_rows();
    let total = rows.len();
    let mut readings: Vec<Reading> = rows
        .into_iter()
        .filter_map(|row| row.into_reading(tz))
        .collect();

    if readings.len() < total {
        tracing::debug!(
            "Skipped {} upstream rows with unusable timestamps",
            total - readings.len()
        );
    }

    readings.sort_by_key(|r| r.timestamp);
    Ok(readings)
}

/// Outcome of a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Readings returned by upstream
    pub received: usize,
    /// Timestamps not previously stored
    pub added: usize,
    /// Readings dropped by retention
    pub pruned: usize,
    /// Readings held after the refresh
    pub total: usize,
}

/// HTTP client for the upstream sensor API.
pub struct Fetcher {
    config: FetcherConfig,
    client: reqwest::Client,
}

impl Fetcher {
    /// Create a new fetcher.
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Endpoint this fetcher polls.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Fetch the current readings from upstream.
    pub async fn fetch_readings(&self) -> Result<Vec<Reading>, FetchError> {
        let response = self
            .client
            .get(&self.config.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FetchError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        parse_body(&body, self.config.tz)
    }

    /// Fetch from upstream and merge into the store.
    ///
    /// On failure the store is not touched.
    pub async fn refresh(&self, store: &SharedStore) -> Result<RefreshSummary, FetchError> {
        let readings = self.fetch_readings().await?;
        let received = readings.len();

        let (summary, job) = {
            let mut store = store.write().await;
            let added = store.upsert(readings);
            let pruned = store.prune(Utc::now());
            let summary = RefreshSummary {
                received,
                added,
                pruned,
                total: store.len(),
            };
            (summary, store.save_job())
        };

        if let Some(job) = job {
            if let Err(e) = job.write_async().await {
                tracing::warn!("Failed to persist readings: {}", e);
            }
        }

        Ok(summary)
    }
}

/// Refresh the store, logging and recording the outcome.
pub async fn run_refresh(
    fetcher: &Fetcher,
    store: &SharedStore,
    activity: &ActivityLog,
) -> Result<RefreshSummary, FetchError> {
    let result = fetcher.refresh(store).await;

    match &result {
        Ok(summary) => {
            activity.record_fetch_success(summary.received as u64);
            tracing::info!(
                "Refreshed readings: {} received, {} new, {} pruned, {} stored",
                summary.received,
                summary.added,
                summary.pruned,
                summary.total
            );
        }
        Err(e) => {
            activity.record_fetch_failure();
            tracing::warn!("Refresh from {} failed: {}", fetcher.url(), e);
        }
    }

    if let Err(e) = activity.save() {
        tracing::warn!("Failed to save activity stats: {}", e);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_fetcher_config_from_config() {
        let config = Config {
            api_base_url: "http://127.0.0.1:9000/".to_string(),
            api_path: "/data".to_string(),
            ..Config::default()
        };
        let fetcher_config = FetcherConfig::from_config(&config).unwrap();
        assert_eq!(fetcher_config.url, "http://127.0.0.1:9000/data");
        assert_eq!(fetcher_config.tz, Tz::UTC);
    }

    #[test]
    fn test_parse_array_body() {
        let body = r#"[
            {"_id": "a1", "timestamp": "2024-03-01T09:05:00Z", "pH": 7.2, "TDS": "130.5", "Depth": null},
            {"_id": "a0", "timestamp": "2024-03-01 09:00:00", "pH": 7.0, "FlowInd": 12}
        ]"#;
        let readings = parse_body(body, Tz::UTC).unwrap();

        assert_eq!(readings.len(), 2);
        // Sorted by timestamp
        assert_eq!(readings[0].timestamp, at("2024-03-01T09:00:00Z"));
        assert_eq!(readings[0].value(Field::FlowInd), Some(12.0));
        assert_eq!(readings[1].value(Field::Tds), Some(130.5));
        assert_eq!(readings[1].value(Field::Depth), None);
        assert_eq!(readings[1].value(Field::FlowInd), None);
    }

    #[test]
    fn test_parse_wrapped_body_with_aliases() {
        let body = r#"{"data": [
            {"time": 1709283600, "ph": "6.9", "tds": 100, "depth": 1.2, "flowind": 3},
            {"timestamp": {"$date": "2024-03-01T09:10:00Z"}, "PH": "n/a"}
        ]}"#;
        let readings = parse_body(body, Tz::UTC).unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].timestamp, at("2024-03-01T09:00:00Z"));
        assert_eq!(readings[0].value(Field::Ph), Some(6.9));
        assert_eq!(readings[0].value(Field::Depth), Some(1.2));
        assert_eq!(readings[1].timestamp, at("2024-03-01T09:10:00Z"));
        assert_eq!(readings[1].value(Field::Ph), None);
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        let body = r#"[{"timestamp": 1709283600000, "pH": 7.0}]"#;
        let readings = parse_body(body, Tz::UTC).unwrap();
        assert_eq!(readings[0].timestamp, at("2024-03-01T09:00:00Z"));
    }

    #[test]
    fn test_rows_without_timestamp_are_skipped() {
        let body = r#"[{"pH": 7.0}, {"timestamp": "garbage", "pH": 7.1}, {"timestamp": "2024-03-01T09:00:00Z"}]"#;
        let readings = parse_body(body, Tz::UTC).unwrap();
        assert_eq!(readings.len(), 1);
    }

    #[test]
    fn test_invalid_body() {
        let err = parse_body("<html>oops</html>", Tz::UTC).unwrap_err();
        assert!(matches!(err, FetchError::Serialization(_)));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Server {
            status: 503,
            message: "down".to_string(),
        };
        assert_eq!(err.to_string(), "Upstream server error (503): down");
    }
}
