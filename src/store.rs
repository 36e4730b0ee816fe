//! In-memory reading store with retention and optional persistence.
//!
//! The store owns the reading sequence. Readings are keyed by timestamp, so
//! a later write at the same instant overwrites the earlier one and reads
//! always come back in ascending time order.

use crate::core::reading::{Measurements, Reading};
use crate::core::time::{local_midnight, start_of_day};
use chrono::{DateTime, Days, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How long readings are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Only readings from the current local day
    #[default]
    Today,
    /// The last `n` local days, today included
    Days(u32),
    /// Never drop readings
    Unbounded,
}

impl RetentionPolicy {
    /// Earliest instant retained at `now`, or `None` when nothing expires.
    pub fn cutoff(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match *self {
            RetentionPolicy::Today | RetentionPolicy::Days(0) | RetentionPolicy::Days(1) => {
                Some(local_midnight(now, tz))
            }
            RetentionPolicy::Days(n) => {
                let today = now.with_timezone(&tz).date_naive();
                today
                    .checked_sub_days(Days::new(u64::from(n - 1)))
                    .and_then(|first| start_of_day(first, tz))
            }
            RetentionPolicy::Unbounded => None,
        }
    }

    /// Parse a policy from `today`, `unbounded` or a number of days (`7`, `7d`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "today" => Some(RetentionPolicy::Today),
            "unbounded" | "all" | "forever" => Some(RetentionPolicy::Unbounded),
            other => other
                .trim_end_matches('d')
                .parse::<u32>()
                .ok()
                .map(RetentionPolicy::Days),
        }
    }
}

/// Reading store for the dashboard.
#[derive(Debug)]
pub struct ReadingStore {
    /// Readings keyed by timestamp
    readings: BTreeMap<DateTime<Utc>, Measurements>,
    /// Retention applied on reads and pruning
    retention: RetentionPolicy,
    /// Timezone defining calendar days
    tz: Tz,
    /// Path for persisting readings
    persist_path: Option<PathBuf>,
}

impl ReadingStore {
    /// Create an empty store.
    pub fn new(retention: RetentionPolicy, tz: Tz) -> Self {
        Self {
            readings: BTreeMap::new(),
            retention,
            tz,
            persist_path: None,
        }
    }

    /// Create a store backed by a JSON file, loading any previous contents.
    pub fn with_persistence(retention: RetentionPolicy, tz: Tz, path: PathBuf) -> Self {
        let mut store = Self::new(retention, tz);
        store.persist_path = Some(path);

        if let Err(e) = store.load() {
            tracing::warn!("Could not load stored readings: {}", e);
        }

        store
    }

    /// Insert readings, overwriting any stored reading with the same timestamp.
    ///
    /// Returns the number of timestamps that were not stored before.
    pub fn upsert<I>(&mut self, readings: I) -> usize
    where
        I: IntoIterator<Item = Reading>,
    {
        let mut added = 0;
        for reading in readings {
            if self
                .readings
                .insert(reading.timestamp, reading.values)
                .is_none()
            {
                added += 1;
            }
        }
        added
    }

    /// Replace the whole contents of the store.
    pub fn replace<I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = Reading>,
    {
        self.readings.clear();
        self.upsert(readings);
    }

    /// Readings visible at `now` under the retention policy, oldest first.
    pub fn readings(&self, now: DateTime<Utc>) -> Vec<Reading> {
        let cutoff = self.retention.cutoff(now, self.tz);
        let iter = self.readings.iter();
        match cutoff {
            Some(cutoff) => iter
                .filter(|(ts, _)| **ts >= cutoff)
                .map(|(ts, values)| Reading::new(*ts, *values))
                .collect(),
            None => iter.map(|(ts, values)| Reading::new(*ts, *values)).collect(),
        }
    }

    /// Every stored reading, oldest first, ignoring retention.
    pub fn all(&self) -> Vec<Reading> {
        self.readings
            .iter()
            .map(|(ts, values)| Reading::new(*ts, *values))
            .collect()
    }

    /// The newest stored reading.
    pub fn latest(&self) -> Option<Reading> {
        self.readings
            .iter()
            .next_back()
            .map(|(ts, values)| Reading::new(*ts, *values))
    }

    /// Drop readings that fall outside the retention policy.
    ///
    /// Returns the number of readings removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = self.retention.cutoff(now, self.tz) else {
            return 0;
        };
        let before = self.readings.len();
        self.readings = self.readings.split_off(&cutoff);
        before - self.readings.len()
    }

    /// Number of stored readings.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check if the store holds no readings.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Retention policy in effect.
    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Save readings to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        match self.save_job() {
            Some(job) => job.write(),
            None => Ok(()),
        }
    }

    /// Snapshot the readings for writing without holding the store.
    ///
    /// Returns `None` when the store has no persistence path.
    pub fn save_job(&self) -> Option<SaveJob> {
        self.persist_path.as_ref().map(|path| SaveJob {
            path: path.clone(),
            readings: self.all(),
        })
    }

    /// Load readings from disk, merging them into the store.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedReadings =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.upsert(persisted.readings);
            }
        }
        Ok(())
    }
}

/// A pending write of a store snapshot to disk.
#[derive(Debug)]
pub struct SaveJob {
    path: PathBuf,
    readings: Vec<Reading>,
}

impl SaveJob {
    /// Number of readings in the snapshot.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Write the snapshot as JSON. Blocking.
    pub fn write(self) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = PersistedReadings {
            readings: self.readings,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string(&persisted).map_err(std::io::Error::other)?;

        std::fs::write(&self.path, json)
    }

    /// Write the snapshot on the blocking thread pool.
    pub async fn write_async(self) -> Result<(), std::io::Error> {
        tokio::task::spawn_blocking(move || self.write())
            .await
            .map_err(std::io::Error::other)?
    }
}

/// Reading file format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedReadings {
    readings: Vec<Reading>,
    last_updated: DateTime<Utc>,
}

/// Reading store shared between the refresh task and request handlers.
pub type SharedStore = Arc<RwLock<ReadingStore>>;

/// Wrap a store for sharing.
pub fn create_shared_store(store: ReadingStore) -> SharedStore {
    Arc::new(RwLock::new(store))
}

/// Persist a shared store. The lock is released before any file I/O.
pub async fn persist(store: &SharedStore) -> Result<(), std::io::Error> {
    let job = store.read().await.save_job();
    match job {
        Some(job) => job.write_async().await,
        None => Ok(()),
    }
}
