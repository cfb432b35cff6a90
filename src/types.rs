//! Core data types used throughout the pipeline

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Measurement name shared by every writer of microgrid telemetry
pub const MEASUREMENT_NAME: &str = "microgrid";

// ============================================================================
// Measurement Schema
// ============================================================================

/// One of the three fields a telemetry sample carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    /// Instantaneous load in kW
    #[serde(rename = "consumption_kW")]
    ConsumptionKw,
    /// Instantaneous generation in kW
    #[serde(rename = "generation_kW")]
    GenerationKw,
    /// Battery state of charge, percent
    #[serde(rename = "battery_soc")]
    BatterySoc,
}

impl Field {
    /// Every field, in schema order
    pub const ALL: [Field; 3] = [Field::ConsumptionKw, Field::GenerationKw, Field::BatterySoc];

    /// Name of the field as stored in the engine
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::ConsumptionKw => "consumption_kW",
            Field::GenerationKw => "generation_kW",
            Field::BatterySoc => "battery_soc",
        }
    }

    /// Look up a field by its stored name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Whether the field is stored as an integer
    pub fn is_integer(&self) -> bool {
        matches!(self, Field::BatterySoc)
    }

    /// Convert a value read back from the engine to this field's type
    pub fn coerce(&self, value: FieldValue) -> FieldValue {
        if self.is_integer() {
            FieldValue::Integer(value.as_i64())
        } else {
            FieldValue::Float(value.as_f64())
        }
    }

    /// Comma-separated list of valid names, for error messages
    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numeric field value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
}

impl FieldValue {
    /// Value as a float
    pub fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::Integer(v) => v as f64,
            FieldValue::Float(v) => v,
        }
    }

    /// Value as an integer, truncating floats
    pub fn as_i64(&self) -> i64 {
        match *self {
            FieldValue::Integer(v) => v,
            FieldValue::Float(v) => v.trunc() as i64,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// One point in time for the microgrid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    /// Load in kW, never negative
    #[serde(rename = "consumption_kW")]
    pub consumption_kw: f64,
    /// Generation in kW, never negative
    #[serde(rename = "generation_kW")]
    pub generation_kw: f64,
    /// State of charge, 0 to 100
    pub battery_soc: i64,
}

impl MeasurementSample {
    /// Create a sample, clamping values into the schema's ranges
    pub fn new(consumption_kw: f64, generation_kw: f64, battery_soc: i64) -> Self {
        Self {
            consumption_kw: non_negative(consumption_kw),
            generation_kw: non_negative(generation_kw),
            battery_soc: battery_soc.clamp(0, 100),
        }
    }

    /// The sample as typed field/value pairs
    pub fn fields(&self) -> [(Field, FieldValue); 3] {
        [
            (Field::ConsumptionKw, FieldValue::Float(self.consumption_kw)),
            (Field::GenerationKw, FieldValue::Float(self.generation_kw)),
            (Field::BatterySoc, FieldValue::Integer(self.battery_soc)),
        ]
    }

    /// Rebuild a sample from field values; `None` unless all three are present
    pub fn from_fields(values: &HashMap<Field, FieldValue>) -> Option<Self> {
        let consumption = values.get(&Field::ConsumptionKw)?;
        let generation = values.get(&Field::GenerationKw)?;
        let soc = values.get(&Field::BatterySoc)?;

        Some(Self {
            consumption_kw: consumption.as_f64(),
            generation_kw: generation.as_f64(),
            battery_soc: soc.as_i64(),
        })
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// A single `(time, value)` pair returned by a range query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Engine-assigned timestamp
    pub time: DateTime<Utc>,
    /// Field value
    pub value: FieldValue,
}

// ============================================================================
// Lookback Windows
// ============================================================================

/// Time unit of a lookback window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookbackUnit {
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
    /// Weeks
    Weeks,
}

impl LookbackUnit {
    fn suffix(&self) -> &'static str {
        match self {
            LookbackUnit::Seconds => "s",
            LookbackUnit::Minutes => "m",
            LookbackUnit::Hours => "h",
            LookbackUnit::Days => "d",
            LookbackUnit::Weeks => "w",
        }
    }

    fn seconds(&self) -> i64 {
        match self {
            LookbackUnit::Seconds => 1,
            LookbackUnit::Minutes => 60,
            LookbackUnit::Hours => 3_600,
            LookbackUnit::Days => 86_400,
            LookbackUnit::Weeks => 604_800,
        }
    }
}

/// A relative time range ending now, e.g. "24h"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookback {
    amount: u32,
    unit: LookbackUnit,
}

impl Lookback {
    /// Create a lookback window
    pub const fn new(amount: u32, unit: LookbackUnit) -> Self {
        Self { amount, unit }
    }

    /// Parse a duration literal like "30s", "1h", "7d" or "2w"
    ///
    /// This is the only syntax check a window receives before it is
    /// embedded in a range query.
    pub fn parse(literal: &str) -> Option<Self> {
        let literal = literal.trim();
        if literal.len() < 2 || !literal.is_ascii() {
            return None;
        }

        let (num_str, unit) = literal.split_at(literal.len() - 1);
        if !num_str.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let amount: u32 = num_str.parse().ok()?;
        if amount == 0 {
            return None;
        }

        let unit = match unit {
            "s" => LookbackUnit::Seconds,
            "m" => LookbackUnit::Minutes,
            "h" => LookbackUnit::Hours,
            "d" => LookbackUnit::Days,
            "w" => LookbackUnit::Weeks,
            _ => return None,
        };

        Some(Self { amount, unit })
    }

    /// Length of the window
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.amount) * self.unit.seconds())
    }

    /// Earliest instant covered by the window, relative to `now`
    ///
    /// Saturates at the earliest representable instant.
    pub fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.duration())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

/// The closed vocabulary of historical query periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    /// Last hour
    Hour,
    /// Last 24 hours
    Day,
    /// Last 7 days
    Week,
    /// Last 30 days
    Month,
}

impl Period {
    /// Every accepted period
    pub const ALL: [Period; 4] = [Period::Hour, Period::Day, Period::Week, Period::Month];

    /// Literal accepted from callers
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Hour => "1h",
            Period::Day => "24h",
            Period::Week => "7d",
            Period::Month => "30d",
        }
    }

    /// Parse one of "1h", "24h", "7d", "30d"
    pub fn parse(literal: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == literal)
    }

    /// The lookback window this period covers
    pub fn lookback(&self) -> Lookback {
        match self {
            Period::Hour => Lookback::new(1, LookbackUnit::Hours),
            Period::Day => Lookback::new(24, LookbackUnit::Hours),
            Period::Week => Lookback::new(7, LookbackUnit::Days),
            Period::Month => Lookback::new(30, LookbackUnit::Days),
        }
    }

    /// Comma-separated list of valid literals, for error messages
    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Needs attention
    #[default]
    Warning,
    /// Needs immediate attention
    Critical,
}

impl Severity {
    /// Parse a severity name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A human-readable notification of an anomaly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Identifier unique within the ledger's contents
    pub id: String,
    /// Free text
    pub message: String,
    /// Source-supplied ISO-8601 timestamp, kept verbatim
    pub timestamp: String,
    /// Severity
    pub severity: Severity,
}

// ============================================================================
// Transport Events
// ============================================================================

/// An untyped payload received from the event transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Channel the payload arrived on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Bytes,
}

impl RawEvent {
    /// Create a new raw event
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
