//! Time-Series Gateway
//!
//! Maps measurement samples onto the engine's write path and reconstructs
//! snapshots and series from its read path. The engine handle is created
//! lazily by the first caller from either the ingestion loop or a query,
//! and shared by everyone afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::engine::{EngineConnector, Point, TimeSeriesEngine};
use crate::error::EngineError;
use crate::types::{Field, Lookback, LookbackUnit, MeasurementSample, SeriesPoint, MEASUREMENT_NAME};

/// Ceiling on how far back `latest` looks
pub const LATEST_LOOKBACK: Lookback = Lookback::new(24, LookbackUnit::Hours);

/// Write/read abstraction over the external time-series engine
pub struct TimeSeriesGateway {
    connector: Arc<dyn EngineConnector>,
    engine: OnceCell<Arc<dyn TimeSeriesEngine>>,
    measurement: String,
}

impl TimeSeriesGateway {
    /// Create a gateway; nothing is connected until the first call
    pub fn new(connector: Arc<dyn EngineConnector>) -> Self {
        Self {
            connector,
            engine: OnceCell::new(),
            measurement: MEASUREMENT_NAME.to_string(),
        }
    }

    /// Use a different measurement name
    pub fn with_measurement(mut self, measurement: impl Into<String>) -> Self {
        self.measurement = measurement.into();
        self
    }

    /// Measurement samples are written to
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Whether the engine handle has been established
    pub fn is_connected(&self) -> bool {
        self.engine.initialized()
    }

    /// The shared engine handle, connecting on first use.
    ///
    /// Concurrent first callers wait on a single attempt. A failed attempt
    /// leaves the cell empty, so the next call tries again.
    async fn engine(&self) -> Result<&Arc<dyn TimeSeriesEngine>, EngineError> {
        self.engine
            .get_or_try_init(|| async {
                let engine = self.connector.connect().await?;
                info!(measurement = %self.measurement, "Connected to time-series engine");
                Ok::<_, EngineError>(engine)
            })
            .await
    }

    /// Append one sample; the engine assigns the timestamp
    pub async fn write(&self, sample: &MeasurementSample) -> Result<(), EngineError> {
        let point = sample
            .fields()
            .into_iter()
            .fold(Point::new(self.measurement.as_str()), |point, (field, value)| {
                point.field(field.as_str(), value)
            });

        self.engine().await?.write_point(&point).await
    }

    /// Most recent complete sample within the last 24 hours
    ///
    /// Returns `Ok(None)` when any of the three fields is missing: a partial
    /// snapshot counts as no data.
    pub async fn latest(&self) -> Result<Option<MeasurementSample>, EngineError> {
        let records = self
            .engine()
            .await?
            .last(&self.measurement, &LATEST_LOOKBACK)
            .await?;

        let values: HashMap<Field, _> = records
            .into_iter()
            .filter_map(|r| Field::parse(&r.field).map(|f| (f, f.coerce(r.value))))
            .collect();

        let sample = MeasurementSample::from_fields(&values);
        if sample.is_none() {
            debug!(fields = values.len(), "Latest sample incomplete");
        }
        Ok(sample)
    }

    /// Values of `field` over the `window` lookback, oldest first
    ///
    /// A field outside the measurement schema yields an empty series without
    /// touching the engine. `window` is only checked for duration syntax.
    pub async fn query(&self, field: &str, window: &str) -> Result<Vec<SeriesPoint>, EngineError> {
        let Some(field) = Field::parse(field) else {
            debug!(field = %field, "Ignoring query for unknown field");
            return Ok(Vec::new());
        };

        let lookback = Lookback::parse(window)
            .ok_or_else(|| EngineError::InvalidQuery(format!("bad lookback window '{}'", window)))?;

        let points = self
            .engine()
            .await?
            .range(&self.measurement, field.as_str(), &lookback)
            .await?;

        Ok(points
            .into_iter()
            .map(|p| SeriesPoint {
                time: p.time,
                value: field.coerce(p.value),
            })
            .collect())
    }

    /// Check the engine is reachable, connecting if needed
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.engine().await?.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InMemoryConnector, InMemoryEngine};
    use crate::types::FieldValue;
    use chrono::Utc;

    fn setup() -> (Arc<InMemoryEngine>, Arc<InMemoryConnector>, TimeSeriesGateway) {
        let engine = Arc::new(InMemoryEngine::new());
        let connector = Arc::new(InMemoryConnector::new(engine.clone()));
        let gateway = TimeSeriesGateway::new(connector.clone());
        (engine, connector, gateway)
    }

    #[tokio::test]
    async fn test_write_then_latest() {
        let (_engine, _connector, gateway) = setup();
        assert!(!gateway.is_connected());

        let sample = MeasurementSample::new(9.5, 11.2, 76);
        gateway.write(&sample).await.unwrap();

        assert!(gateway.is_connected());
        assert_eq!(gateway.latest().await.unwrap(), Some(sample));
    }

    #[tokio::test]
    async fn test_latest_without_data() {
        let (_engine, _connector, gateway) = setup();
        assert_eq!(gateway.latest().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_latest_partial_is_no_data() {
        let (engine, _connector, gateway) = setup();
        let now = Utc::now();
        engine.insert_at("microgrid", "consumption_kW", now, FieldValue::Float(9.5));
        engine.insert_at("microgrid", "generation_kW", now, FieldValue::Float(11.2));

        assert_eq!(gateway.latest().await.unwrap(), None);

        engine.insert_at("microgrid", "battery_soc", now, FieldValue::Float(76.0));
        let sample = gateway.latest().await.unwrap().unwrap();
        assert_eq!(sample.battery_soc, 76);
    }

    #[tokio::test]
    async fn test_query_unknown_field_is_empty_without_connecting() {
        let (_engine, connector, gateway) = setup();
        let points = gateway.query("voltage", "24h").await.unwrap();
        assert!(points.is_empty());
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_query_coerces_field_type() {
        let (engine, _connector, gateway) = setup();
        engine.insert_at("microgrid", "battery_soc", Utc::now(), FieldValue::Float(42.0));

        let points = gateway.query("battery_soc", "1h").await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, FieldValue::Integer(42));
    }

    #[tokio::test]
    async fn test_query_bad_window() {
        let (_engine, _connector, gateway) = setup();
        let err = gateway.query("battery_soc", "forever").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_connects_once_under_concurrency() {
        let (_engine, connector, gateway) = setup();
        let gateway = Arc::new(gateway);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        gateway.write(&MeasurementSample::new(1.0, 1.0, 1)).await
                    } else {
                        gateway.latest().await.map(|_| ())
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_propagates_and_retries() {
        let (_engine, connector, gateway) = setup();
        connector.set_refusing(true);

        let err = gateway.latest().await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
        assert!(!gateway.is_connected());

        connector.set_refusing(false);
        assert!(gateway.latest().await.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_custom_measurement() {
        let (engine, connector, _) = setup();
        let gateway = TimeSeriesGateway::new(connector).with_measurement("site_b");
        gateway.write(&MeasurementSample::new(1.0, 2.0, 3)).await.unwrap();

        assert_eq!(gateway.measurement(), "site_b");
        assert_eq!(engine.value_count(), 3);
        assert!(gateway.latest().await.unwrap().is_some());
    }
}
