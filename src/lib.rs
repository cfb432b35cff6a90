//! Microgrid telemetry ingestion and alerting pipeline
//!
//! Consumes device telemetry and alerts from an event broker, persists
//! telemetry in a time-series engine, keeps recent alerts in a bounded
//! in-memory ledger, and serves both through a read-side query facade.
//!
//! ```text
//!   broker ──▶ IngestionSupervisor ──▶ EventRouter ──┬──▶ TimeSeriesGateway ──▶ engine
//!                                                    └──▶ AlertLedger
//!                                                              │
//!   HTTP ◀── QueryFacade ◀─────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod gateway;
pub mod ledger;
pub mod observability;
pub mod router;
pub mod services;
pub mod transport;
pub mod types;

pub use config::Config;
pub use error::{DispatchError, EngineError, Error, LedgerError, QueryError, Result, TransportError};
pub use facade::QueryFacade;
pub use gateway::TimeSeriesGateway;
pub use ledger::AlertLedger;
pub use router::{Action, DropReason, EventRouter};
pub use services::{Dispatcher, IngestionSupervisor, SupervisorState};
pub use types::{Alert, Field, FieldValue, MeasurementSample, Period, RawEvent, SeriesPoint, Severity};
