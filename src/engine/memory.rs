//! In-process time-series engine
//!
//! Holds every written field value in memory. Used for tests and local runs
//! without an InfluxDB instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::traits::{EngineConnector, FieldRecord, Point, TimeSeriesEngine};
use crate::error::EngineError;
use crate::types::{FieldValue, Lookback, SeriesPoint};

#[derive(Debug, Clone)]
struct StoredValue {
    measurement: String,
    field: String,
    time: DateTime<Utc>,
    value: FieldValue,
}

/// In-memory engine
#[derive(Default)]
pub struct InMemoryEngine {
    values: RwLock<Vec<StoredValue>>,
    unavailable: AtomicBool,
}

impl InMemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a connection error, or recover
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Store a single field value at an explicit time
    pub fn insert_at(
        &self,
        measurement: &str,
        field: &str,
        time: DateTime<Utc>,
        value: FieldValue,
    ) {
        self.values.write().push(StoredValue {
            measurement: measurement.to_string(),
            field: field.to_string(),
            time,
            value,
        });
    }

    /// Number of stored field values
    pub fn value_count(&self) -> usize {
        self.values.read().len()
    }

    fn check_available(&self) -> Result<(), EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(EngineError::Connection("engine unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TimeSeriesEngine for InMemoryEngine {
    async fn write_point(&self, point: &Point) -> Result<(), EngineError> {
        self.check_available()?;
        if point.fields.is_empty() {
            return Err(EngineError::Write("point has no fields".to_string()));
        }

        let now = Utc::now();
        let mut values = self.values.write();
        for (field, value) in &point.fields {
            values.push(StoredValue {
                measurement: point.measurement.clone(),
                field: field.clone(),
                time: now,
                value: *value,
            });
        }
        Ok(())
    }

    async fn last(
        &self,
        measurement: &str,
        lookback: &Lookback,
    ) -> Result<Vec<FieldRecord>, EngineError> {
        self.check_available()?;
        let start = lookback.start_from(Utc::now());

        // Later inserts win ties, like the engine's own last()
        let mut latest: BTreeMap<&str, &StoredValue> = BTreeMap::new();
        let values = self.values.read();
        for stored in values
            .iter()
            .filter(|v| v.measurement == measurement && v.time >= start)
        {
            match latest.get(stored.field.as_str()) {
                Some(existing) if existing.time > stored.time => {}
                _ => {
                    latest.insert(stored.field.as_str(), stored);
                }
            }
        }

        Ok(latest
            .into_values()
            .map(|v| FieldRecord {
                field: v.field.clone(),
                time: v.time,
                value: v.value,
            })
            .collect())
    }

    async fn range(
        &self,
        measurement: &str,
        field: &str,
        lookback: &Lookback,
    ) -> Result<Vec<SeriesPoint>, EngineError> {
        self.check_available()?;
        let start = lookback.start_from(Utc::now());

        let mut points: Vec<SeriesPoint> = self
            .values
            .read()
            .iter()
            .filter(|v| v.measurement == measurement && v.field == field && v.time >= start)
            .map(|v| SeriesPoint {
                time: v.time,
                value: v.value,
            })
            .collect();

        // Stable sort keeps insertion order for equal timestamps
        points.sort_by_key(|p| p.time);
        Ok(points)
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.check_available()
    }
}

/// Connector handing out a shared [`InMemoryEngine`]
///
/// Counts connect calls so callers can observe how often a connection
/// was established.
pub struct InMemoryConnector {
    engine: Arc<InMemoryEngine>,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

impl InMemoryConnector {
    /// Create a connector for an engine
    pub fn new(engine: Arc<InMemoryEngine>) -> Self {
        Self {
            engine,
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }

    /// Make connection attempts fail, or succeed again
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connect attempts so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineConnector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn TimeSeriesEngine>, EngineError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(EngineError::Connection("connection refused".to_string()));
        }
        Ok(self.engine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day() -> Lookback {
        Lookback::parse("24h").unwrap()
    }

    #[tokio::test]
    async fn test_write_and_range() {
        let engine = InMemoryEngine::new();
        for v in [1.0, 2.0, 3.0] {
            engine
                .write_point(&Point::new("microgrid").field("generation_kW", FieldValue::Float(v)))
                .await
                .unwrap();
        }

        let points = engine.range("microgrid", "generation_kW", &day()).await.unwrap();
        let values: Vec<f64> = points.iter().map(|p| p.value.as_f64()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert!(points.windows(2).all(|w| w[0].time <= w[1].time));

        assert!(engine
            .range("microgrid", "battery_soc", &day())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_range_orders_by_time_and_respects_lookback() {
        let engine = InMemoryEngine::new();
        let now = Utc::now();
        engine.insert_at("microgrid", "battery_soc", now - Duration::minutes(5), FieldValue::Integer(50));
        engine.insert_at("microgrid", "battery_soc", now - Duration::minutes(30), FieldValue::Integer(40));
        engine.insert_at("microgrid", "battery_soc", now - Duration::hours(3), FieldValue::Integer(30));

        let points = engine
            .range("microgrid", "battery_soc", &Lookback::parse("1h").unwrap())
            .await
            .unwrap();
        let values: Vec<i64> = points.iter().map(|p| p.value.as_i64()).collect();
        assert_eq!(values, vec![40, 50]);
    }

    #[tokio::test]
    async fn test_last_per_field() {
        let engine = InMemoryEngine::new();
        let now = Utc::now();
        engine.insert_at("microgrid", "consumption_kW", now - Duration::minutes(2), FieldValue::Float(1.0));
        engine.insert_at("microgrid", "consumption_kW", now - Duration::minutes(1), FieldValue::Float(2.0));
        engine.insert_at("microgrid", "battery_soc", now - Duration::hours(30), FieldValue::Integer(10));
        engine.insert_at("other", "consumption_kW", now, FieldValue::Float(99.0));

        let records = engine.last("microgrid", &day()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field, "consumption_kW");
        assert_eq!(records[0].value, FieldValue::Float(2.0));
    }

    #[tokio::test]
    async fn test_unavailable_engine() {
        let engine = InMemoryEngine::new();
        engine.set_available(false);

        let err = engine.ping().await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
        assert!(engine
            .write_point(&Point::new("microgrid").field("battery_soc", FieldValue::Integer(1)))
            .await
            .is_err());

        engine.set_available(true);
        assert!(engine.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_connector_counts_attempts() {
        let connector = InMemoryConnector::new(Arc::new(InMemoryEngine::new()));
        connector.set_refusing(true);
        assert!(connector.connect().await.is_err());
        connector.set_refusing(false);
        assert!(connector.connect().await.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }
}
