//! Background Services Module
//!
//! # Services
//!
//! - **IngestionSupervisor**: Owns the broker subscription and the receive loop
//! - **HealthChecker**: Reports ingestion and time-series health on demand
//!
//! # Example
//!
//! ```rust,ignore
//! use microgrid_telemetry::services::IngestionSupervisor;
//!
//! let supervisor = IngestionSupervisor::new(connector, dispatcher, &config.ingest);
//! supervisor.start().await?;
//!
//! // Graceful shutdown
//! supervisor.stop().await;
//! ```

pub mod health;
pub mod ingest;

pub use health::{CheckResult, HealthChecker, HealthConfig, HealthReport, HealthStatus};
pub use ingest::{Dispatcher, IngestionSupervisor, SupervisorState};
