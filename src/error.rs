//! Error types for the telemetry pipeline

use std::time::Duration;

use thiserror::Error;

/// Startup error for the pipeline binaries
///
/// Runtime failures use the per-component errors below.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Time-series engine errors
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// The engine could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A write was rejected or failed in flight
    #[error("Write failed: {0}")]
    Write(String),

    /// Query execution failed
    #[error("Query error: {0}")]
    Query(String),

    /// The query could not be built from the given arguments
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The engine returned a response that could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Event transport errors
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Connecting to the broker failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connecting to the broker did not finish in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Registering interest in a topic failed
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The transport is gone for good
    #[error("Transport closed")]
    Closed,
}

/// Alert ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The alert timestamp is not ISO-8601
    #[error("Invalid timestamp '{timestamp}': {reason}")]
    InvalidTimestamp {
        /// The rejected input
        timestamp: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Failures caught at the receive-loop boundary.
///
/// These never propagate out of the loop; they are logged and counted.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// Measurement write failed
    #[error("Measurement write failed: {0}")]
    Write(#[from] EngineError),

    /// Alert could not be recorded
    #[error("Alert rejected: {0}")]
    Alert(#[from] LedgerError),
}

impl DispatchError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Write(_) => "write",
            DispatchError::Alert(_) => "alert",
        }
    }
}

/// Typed outcome of a failed query facade call
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// Caller input was rejected before any engine round-trip
    #[error("{0}")]
    Validation(String),

    /// The engine answered but has no complete data yet
    #[error("No data available")]
    NotFound,

    /// The engine could not be used
    #[error("{0}")]
    Unavailable(String),
}

impl From<EngineError> for QueryError {
    fn from(err: EngineError) -> Self {
        QueryError::Unavailable(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
