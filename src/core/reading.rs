//! Sensor reading types and the measured field catalogue.
//!
//! A reading carries up to four measurements. Any of them may be missing,
//! and a missing value never takes part in averaging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One measured quantity reported by the water-quality sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    #[serde(rename = "pH")]
    Ph,
    #[serde(rename = "TDS")]
    Tds,
    #[serde(rename = "Depth")]
    Depth,
    #[serde(rename = "FlowInd")]
    FlowInd,
}

impl Field {
    /// All fields in column order.
    pub const ALL: [Field; 4] = [Field::Ph, Field::Tds, Field::Depth, Field::FlowInd];

    /// Column key as used by the upstream API and the table/export columns.
    pub fn key(&self) -> &'static str {
        match self {
            Field::Ph => "pH",
            Field::Tds => "TDS",
            Field::Depth => "Depth",
            Field::FlowInd => "FlowInd",
        }
    }

    /// Human readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Field::Ph => "pH Level",
            Field::Tds => "TDS",
            Field::Depth => "Water Level",
            Field::FlowInd => "Flow Rate",
        }
    }

    /// Measurement unit, empty when the quantity is unitless.
    pub fn unit(&self) -> &'static str {
        match self {
            Field::Ph => "",
            Field::Tds => "ppm",
            Field::Depth => "m",
            Field::FlowInd => "kL/10min",
        }
    }

    /// Chart line colour.
    pub fn color(&self) -> &'static str {
        match self {
            Field::Ph => "#1f77b4",
            Field::Tds => "#ff7f0e",
            Field::Depth => "#2ca02c",
            Field::FlowInd => "#d62728",
        }
    }

    /// Nominal display range (min, max).
    pub fn range(&self) -> (f64, f64) {
        match self {
            Field::Ph => (6.0, 9.0),
            Field::Tds => (0.0, 500.0),
            Field::Depth => (0.0, 10.0),
            Field::FlowInd => (0.0, 100.0),
        }
    }

    /// Series label, e.g. `TDS (ppm)` or `pH Level`.
    pub fn label(&self) -> String {
        if self.unit().is_empty() {
            self.name().to_string()
        } else {
            format!("{} ({})", self.name(), self.unit())
        }
    }

    /// Parse a field key, case-insensitively.
    pub fn from_key(key: &str) -> Option<Field> {
        let key = key.trim();
        Field::ALL
            .into_iter()
            .find(|f| f.key().eq_ignore_ascii_case(key))
    }

    /// Parse a comma-separated list of field keys, skipping unknown keys and duplicates.
    pub fn parse_list(s: &str) -> Vec<Field> {
        let mut fields = Vec::new();
        for field in s.split(',').filter_map(Field::from_key) {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The four measurements of a reading or an aggregated bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    #[serde(rename = "pH")]
    pub ph: Option<f64>,
    #[serde(rename = "TDS")]
    pub tds: Option<f64>,
    #[serde(rename = "Depth")]
    pub depth: Option<f64>,
    #[serde(rename = "FlowInd")]
    pub flow_ind: Option<f64>,
}

impl Measurements {
    /// Get the value of a field.
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Ph => self.ph,
            Field::Tds => self.tds,
            Field::Depth => self.depth,
            Field::FlowInd => self.flow_ind,
        }
    }

    /// Set the value of a field. Non-finite values are stored as missing.
    pub fn set(&mut self, field: Field, value: Option<f64>) {
        let value = value.filter(|v| v.is_finite());
        match field {
            Field::Ph => self.ph = value,
            Field::Tds => self.tds = value,
            Field::Depth => self.depth = value,
            Field::FlowInd => self.flow_ind = value,
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    /// Check if every field is missing.
    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|&f| self.get(f).is_none())
    }
}

/// A single timestamped sensor sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Measured values
    #[serde(flatten)]
    pub values: Measurements,
}

impl Reading {
    /// Create a reading.
    pub fn new(timestamp: DateTime<Utc>, values: Measurements) -> Self {
        Self { timestamp, values }
    }

    /// Get the value of a field.
    pub fn value(&self, field: Field) -> Option<f64> {
        self.values.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_parsing() {
        assert_eq!(Field::from_key("pH"), Some(Field::Ph));
        assert_eq!(Field::from_key(" tds "), Some(Field::Tds));
        assert_eq!(Field::from_key("flowind"), Some(Field::FlowInd));
        assert_eq!(Field::from_key("turbidity"), None);

        let fields = Field::parse_list("pH,Depth,bogus,pH");
        assert_eq!(fields, vec![Field::Ph, Field::Depth]);
    }

    #[test]
    fn test_field_labels() {
        assert_eq!(Field::Ph.label(), "pH Level");
        assert_eq!(Field::Tds.label(), "TDS (ppm)");
        assert_eq!(Field::FlowInd.label(), "Flow Rate (kL/10min)");
    }

    #[test]
    fn test_non_finite_values_are_missing() {
        let mut values = Measurements::default();
        values.set(Field::Ph, Some(f64::NAN));
        values.set(Field::Tds, Some(f64::INFINITY));
        values.set(Field::Depth, Some(1.5));

        assert_eq!(values.get(Field::Ph), None);
        assert_eq!(values.get(Field::Tds), None);
        assert_eq!(values.get(Field::Depth), Some(1.5));
        assert!(!values.is_empty());
        assert!(Measurements::default().is_empty());
    }

    #[test]
    fn test_reading_serializes_flat() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let reading = Reading::new(ts, Measurements::default().with(Field::Ph, 7.0));
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["pH"], 7.0);
        assert!(json["TDS"].is_null());
        assert!(json.get("timestamp").is_some());
    }
}
