//! Configuration for the water quality dashboard.

use crate::core::aggregate::BucketOrigin;
use crate::store::RetentionPolicy;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default upstream API base URL.
pub const DEFAULT_API_URL: &str = "https://mongodb-api-hmeu.onrender.com";

/// Main configuration for the dashboard service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the upstream sensor API
    pub api_base_url: String,

    /// Path of the readings endpoint, appended to the base URL
    pub api_path: String,

    /// Port the dashboard listens on
    pub port: u16,

    /// Verbose logging
    pub debug: bool,

    /// How often the upstream API is polled
    #[serde(with = "duration_serde")]
    pub refresh_interval: Duration,

    /// Timeout for a single upstream request
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// IANA timezone used for calendar days, naive timestamps and display
    pub timezone: String,

    /// Anchor for aggregation buckets
    pub bucket_origin: BucketOrigin,

    /// How long readings are kept
    pub retention: RetentionPolicy,

    /// Also fetch from upstream on every dashboard request
    pub fetch_on_request: bool,

    /// Path for storing readings and activity stats
    pub data_path: PathBuf,

    /// Path for exported spreadsheets
    pub export_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("water-quality-dashboard");

        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            api_path: "/data".to_string(),
            port: 8080,
            debug: false,
            refresh_interval: Duration::from_secs(600), // 10 minutes
            request_timeout: Duration::from_secs(10),
            timezone: "UTC".to_string(),
            bucket_origin: BucketOrigin::LocalMidnight,
            retention: RetentionPolicy::Today,
            fetch_on_request: true,
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from the default location without environment overrides.
    pub fn load_file() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `API_URL`, `PORT`, `DEBUG`, `TIMEZONE` and `RETENTION` overrides.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("API_URL").filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }

        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => tracing::warn!("Ignoring invalid PORT '{}': {}", port, e),
            }
        }

        if let Some(debug) = lookup("DEBUG") {
            self.debug = debug.trim().eq_ignore_ascii_case("true");
        }

        if let Some(tz) = lookup("TIMEZONE") {
            self.timezone = tz.trim().to_string();
        }

        if let Some(retention) = lookup("RETENTION") {
            match RetentionPolicy::parse(&retention) {
                Some(policy) => self.retention = policy,
                None => tracing::warn!("Ignoring invalid RETENTION '{}'", retention),
            }
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("water-quality-dashboard")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::ParseError(format!("Unknown timezone '{}': {}", self.timezone, e)))
    }

    /// Full URL of the upstream readings endpoint.
    pub fn api_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.api_path.trim_start_matches('/')
        )
    }

    /// Location of the persisted readings file.
    pub fn readings_path(&self) -> PathBuf {
        self.data_path.join("readings.json")
    }

    /// Location of the persisted activity stats.
    pub fn activity_path(&self) -> PathBuf {
        self.data_path.join("activity.json")
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
