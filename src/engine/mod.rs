//! Pluggable time-series engines behind a write/query contract

pub mod influx;
pub mod memory;
pub mod traits;

pub use influx::{InfluxConnector, InfluxEngine};
pub use memory::{InMemoryConnector, InMemoryEngine};
pub use traits::{EngineConnector, FieldRecord, Point, TimeSeriesEngine};
