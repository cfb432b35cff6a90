//! InfluxDB v2 engine over the HTTP API
//!
//! Writes use line protocol without a timestamp so the server assigns one.
//! Reads run Flux queries and decode the CSV response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::traits::{EngineConnector, FieldRecord, Point, TimeSeriesEngine};
use crate::config::InfluxConfig;
use crate::error::EngineError;
use crate::types::{FieldValue, Lookback, SeriesPoint};

// =============================================================================
// Engine
// =============================================================================

/// InfluxDB v2 engine
pub struct InfluxEngine {
    client: Client,
    config: InfluxConfig,
}

impl InfluxEngine {
    /// Build an engine with its own HTTP client
    pub fn new(config: InfluxConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.token)
    }

    async fn run_query(&self, flux: String) -> Result<Vec<HashMap<String, String>>, EngineError> {
        debug!(query = %flux, "Running flux query");

        let resp = self
            .client
            .post(self.endpoint("/api/v2/query"))
            .query(&[("org", self.config.org.as_str())])
            .header(AUTHORIZATION, self.auth_header())
            .header(ACCEPT, "application/csv")
            .header(CONTENT_TYPE, "application/vnd.flux")
            .body(flux)
            .send()
            .await
            .map_err(|e| transport_error(e, EngineError::Query))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| transport_error(e, EngineError::Query))?;

        if !status.is_success() {
            return Err(EngineError::Query(format!("{}: {}", status, body.trim())));
        }

        Ok(parse_csv(&body))
    }
}

fn transport_error(err: reqwest::Error, otherwise: fn(String) -> EngineError) -> EngineError {
    if err.is_connect() || err.is_timeout() {
        EngineError::Connection(err.to_string())
    } else {
        otherwise(err.to_string())
    }
}

#[async_trait]
impl TimeSeriesEngine for InfluxEngine {
    async fn write_point(&self, point: &Point) -> Result<(), EngineError> {
        let line = to_line_protocol(point)?;

        let resp = self
            .client
            .post(self.endpoint("/api/v2/write"))
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(AUTHORIZATION, self.auth_header())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await
            .map_err(|e| transport_error(e, EngineError::Write))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Write(format!("{}: {}", status, body.trim())));
        }
        Ok(())
    }

    async fn last(
        &self,
        measurement: &str,
        lookback: &Lookback,
    ) -> Result<Vec<FieldRecord>, EngineError> {
        let rows = self
            .run_query(last_query(&self.config.bucket, measurement, lookback))
            .await?;

        rows.iter()
            .map(|row| {
                Ok(FieldRecord {
                    field: column(row, "_field")?.to_string(),
                    time: parse_time(column(row, "_time")?)?,
                    value: parse_value(column(row, "_value")?)?,
                })
            })
            .collect()
    }

    async fn range(
        &self,
        measurement: &str,
        field: &str,
        lookback: &Lookback,
    ) -> Result<Vec<SeriesPoint>, EngineError> {
        let rows = self
            .run_query(range_query(&self.config.bucket, measurement, field, lookback))
            .await?;

        rows.iter()
            .map(|row| {
                Ok(SeriesPoint {
                    time: parse_time(column(row, "_time")?)?,
                    value: parse_value(column(row, "_value")?)?,
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), EngineError> {
        let resp = self
            .client
            .get(self.endpoint("/ping"))
            .send()
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        match resp.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            status => Err(EngineError::Connection(format!("ping returned {}", status))),
        }
    }
}

/// Connector building an [`InfluxEngine`] and checking it answers
pub struct InfluxConnector {
    config: InfluxConfig,
}

impl InfluxConnector {
    /// Create a connector
    pub fn new(config: InfluxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineConnector for InfluxConnector {
    async fn connect(&self) -> Result<Arc<dyn TimeSeriesEngine>, EngineError> {
        let engine = InfluxEngine::new(self.config.clone())?;
        engine.ping().await?;
        Ok(Arc::new(engine))
    }
}

// =============================================================================
// Line Protocol
// =============================================================================

fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render a point as a single line-protocol record without a timestamp
pub fn to_line_protocol(point: &Point) -> Result<String, EngineError> {
    if point.fields.is_empty() {
        return Err(EngineError::Write("point has no fields".to_string()));
    }

    let mut fields = Vec::with_capacity(point.fields.len());
    for (name, value) in &point.fields {
        let rendered = match value {
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::Float(v) if v.is_finite() => format!("{}", v),
            FieldValue::Float(v) => {
                return Err(EngineError::Write(format!("field {} is not finite: {}", name, v)))
            }
        };
        fields.push(format!("{}={}", escape_key(name), rendered));
    }

    Ok(format!("{} {}", escape_key(&point.measurement), fields.join(",")))
}

// =============================================================================
// Flux Queries
// =============================================================================

fn flux_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Latest value of every field of a measurement
pub fn last_query(bucket: &str, measurement: &str, lookback: &Lookback) -> String {
    format!(
        "from(bucket: {})\n  |> range(start: -{})\n  |> filter(fn: (r) => r._measurement == {})\n  |> last()",
        flux_string(bucket),
        lookback,
        flux_string(measurement),
    )
}

/// One field of a measurement, oldest first
pub fn range_query(bucket: &str, measurement: &str, field: &str, lookback: &Lookback) -> String {
    format!(
        "from(bucket: {})\n  |> range(start: -{})\n  |> filter(fn: (r) => r._measurement == {})\n  |> filter(fn: (r) => r._field == {})\n  |> keep(columns: [\"_time\", \"_value\", \"_field\"])\n  |> sort(columns: [\"_time\"])",
        flux_string(bucket),
        lookback,
        flux_string(measurement),
        flux_string(field),
    )
}

// =============================================================================
// CSV Decoding
// =============================================================================

/// Decode a Flux CSV response into rows keyed by column name
///
/// Tables are separated by blank lines and each starts with a header row.
/// Annotation rows (`#...`) are skipped.
pub fn parse_csv(body: &str) -> Vec<HashMap<String, String>> {
    let mut rows = Vec::new();
    let mut header: Option<Vec<String>> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let cells: Vec<&str> = line.split(',').collect();
        match &header {
            None => header = Some(cells.iter().map(|c| c.to_string()).collect()),
            Some(columns) => {
                let row = columns
                    .iter()
                    .zip(cells.iter())
                    .filter(|(name, _)| !name.is_empty())
                    .map(|(name, cell)| (name.clone(), cell.to_string()))
                    .collect();
                rows.push(row);
            }
        }
    }

    rows
}

fn column<'a>(row: &'a HashMap<String, String>, name: &str) -> Result<&'a str, EngineError> {
    row.get(name)
        .map(String::as_str)
        .ok_or_else(|| EngineError::Parse(format!("missing column {}", name)))
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Parse(format!("bad time '{}': {}", text, e)))
}

fn parse_value(text: &str) -> Result<FieldValue, EngineError> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(FieldValue::Integer(v));
    }
    text.parse::<f64>()
        .map(FieldValue::Float)
        .map_err(|_| EngineError::Parse(format!("bad value '{}'", text)))
}
