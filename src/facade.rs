//! Query Facade
//!
//! Read-side contract used by the HTTP layer. Holds no state of its own.

use std::sync::Arc;

use tracing::debug;

use crate::error::QueryError;
use crate::gateway::TimeSeriesGateway;
use crate::ledger::AlertLedger;
use crate::types::{Alert, Field, MeasurementSample, Period, SeriesPoint};

/// Composition of the gateway and ledger read paths
#[derive(Clone)]
pub struct QueryFacade {
    gateway: Arc<TimeSeriesGateway>,
    ledger: Arc<AlertLedger>,
}

impl QueryFacade {
    pub fn new(gateway: Arc<TimeSeriesGateway>, ledger: Arc<AlertLedger>) -> Self {
        Self { gateway, ledger }
    }

    /// Latest complete sample.
    ///
    /// `NotFound` means the engine answered without a complete sample;
    /// `Unavailable` means the engine could not be asked.
    pub async fn realtime_snapshot(&self) -> Result<MeasurementSample, QueryError> {
        self.gateway.latest().await?.ok_or(QueryError::NotFound)
    }

    /// Series for `metric` over `period`, oldest first.
    ///
    /// Both inputs are checked against their closed vocabularies before the
    /// engine is touched.
    pub async fn historical_series(
        &self,
        metric: &str,
        period: &str,
    ) -> Result<Vec<SeriesPoint>, QueryError> {
        let field = Field::parse(metric).ok_or_else(|| {
            QueryError::Validation(format!("Invalid metric. Must be one of: {}", Field::names()))
        })?;
        let period = Period::parse(period).ok_or_else(|| {
            QueryError::Validation(format!(
                "Invalid period. Must be one of: {}",
                Period::names()
            ))
        })?;

        let points = self
            .gateway
            .query(field.as_str(), &period.lookback().to_string())
            .await?;
        debug!(metric = %field, period = period.as_str(), points = points.len(), "Historical series");
        Ok(points)
    }

    /// Every retained alert, newest first
    pub fn alerts(&self) -> Vec<Alert> {
        self.ledger.list()
    }
}
