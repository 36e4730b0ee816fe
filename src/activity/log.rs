//! Activity log for fetches and exports.
//!
//! Tracks how the dashboard has been talking to the upstream API so that
//! silent fetch failures are still visible on the status endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel for "never happened" in the timestamp slots.
const NEVER: i64 = i64::MIN;

/// Activity counters for the running service.
#[derive(Debug)]
pub struct ActivityLog {
    /// Number of successful upstream fetches
    fetches_succeeded: AtomicU64,
    /// Number of failed upstream fetches
    fetches_failed: AtomicU64,
    /// Number of readings received from upstream
    readings_received: AtomicU64,
    /// Number of export documents produced
    exports_written: AtomicU64,
    /// Last successful fetch (unix millis)
    last_success: AtomicI64,
    /// Last failed fetch (unix millis)
    last_failure: AtomicI64,
    /// Service start time
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl ActivityLog {
    /// Create a new activity log.
    pub fn new() -> Self {
        Self {
            fetches_succeeded: AtomicU64::new(0),
            fetches_failed: AtomicU64::new(0),
            readings_received: AtomicU64::new(0),
            exports_written: AtomicU64::new(0),
            last_success: AtomicI64::new(NEVER),
            last_failure: AtomicI64::new(NEVER),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create an activity log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous activity stats: {}", e);
        }

        log
    }

    /// Record a successful fetch of `count` readings.
    pub fn record_fetch_success(&self, count: u64) {
        self.fetches_succeeded.fetch_add(1, Ordering::Relaxed);
        self.readings_received.fetch_add(count, Ordering::Relaxed);
        self.last_success
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Record a failed fetch.
    pub fn record_fetch_failure(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
        self.last_failure
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Record an export document.
    pub fn record_export(&self) {
        self.exports_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> ActivityStats {
        ActivityStats {
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            readings_received: self.readings_received.load(Ordering::Relaxed),
            exports_written: self.exports_written.load(Ordering::Relaxed),
            last_success: from_millis(self.last_success.load(Ordering::Relaxed)),
            last_failure: from_millis(self.last_failure.load(Ordering::Relaxed)),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let fmt_time = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string())
        };
        format!(
            "Activity:\n\
             - Successful fetches: {}\n\
             - Failed fetches: {}\n\
             - Readings received: {}\n\
             - Exports written: {}\n\
             - Last success: {}\n\
             - Last failure: {}",
            stats.fetches_succeeded,
            stats.fetches_failed,
            stats.readings_received,
            stats.exports_written,
            fmt_time(stats.last_success),
            fmt_time(stats.last_failure),
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                fetches_succeeded: stats.fetches_succeeded,
                fetches_failed: stats.fetches_failed,
                readings_received: stats.readings_received,
                exports_written: stats.exports_written,
                last_success: stats.last_success,
                last_failure: stats.last_failure,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.fetches_succeeded
                    .store(persisted.fetches_succeeded, Ordering::Relaxed);
                self.fetches_failed
                    .store(persisted.fetches_failed, Ordering::Relaxed);
                self.readings_received
                    .store(persisted.readings_received, Ordering::Relaxed);
                self.exports_written
                    .store(persisted.exports_written, Ordering::Relaxed);
                self.last_success.store(
                    persisted.last_success.map_or(NEVER, |t| t.timestamp_millis()),
                    Ordering::Relaxed,
                );
                self.last_failure.store(
                    persisted.last_failure.map_or(NEVER, |t| t.timestamp_millis()),
                    Ordering::Relaxed,
                );
            }
        }
        Ok(())
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms == NEVER {
        None
    } else {
        DateTime::from_timestamp_millis(ms)
    }
}

/// Snapshot of activity statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    pub readings_received: u64,
    pub exports_written: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    fetches_succeeded: u64,
    fetches_failed: u64,
    readings_received: u64,
    exports_written: u64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared activity log.
pub type SharedActivityLog = Arc<ActivityLog>;

/// Create a new shared activity log.
pub fn create_shared_log() -> SharedActivityLog {
    Arc::new(ActivityLog::new())
}

/// Create a new shared activity log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedActivityLog {
    Arc::new(ActivityLog::with_persistence(path))
}
