//! Traits for pluggable time-series engines

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::EngineError;
use crate::types::{FieldValue, Lookback, SeriesPoint};

/// A single multi-field point to append
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name
    pub measurement: String,
    /// Field name/value pairs
    pub fields: Vec<(String, FieldValue)>,
}

impl Point {
    /// Create an empty point for a measurement
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field
    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }
}

/// The most recent value of one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRecord {
    /// Field name
    pub field: String,
    /// When it was written
    pub time: DateTime<Utc>,
    /// Value
    pub value: FieldValue,
}

/// Write/read contract against an external time-series engine
///
/// Points carry no timestamp: the engine assigns one at write time.
#[async_trait]
pub trait TimeSeriesEngine: Send + Sync {
    /// Append one point
    async fn write_point(&self, point: &Point) -> Result<(), EngineError>;

    /// Latest value of every field of `measurement` written within `lookback`
    async fn last(
        &self,
        measurement: &str,
        lookback: &Lookback,
    ) -> Result<Vec<FieldRecord>, EngineError>;

    /// Values of one field within `lookback`, in ascending time order
    async fn range(
        &self,
        measurement: &str,
        field: &str,
        lookback: &Lookback,
    ) -> Result<Vec<SeriesPoint>, EngineError>;

    /// Check the engine is reachable
    async fn ping(&self) -> Result<(), EngineError>;
}

/// Establishes an engine handle; called at most once per gateway
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Open a handle to the engine
    async fn connect(&self) -> Result<Arc<dyn TimeSeriesEngine>, EngineError>;
}
