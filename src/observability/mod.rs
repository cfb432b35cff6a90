//! Observability for the ingestion pipeline
//!
//! Pipeline counters live in a private Prometheus registry owned by
//! [`PipelineMetrics`]; the receive loop reports into it and the HTTP
//! surface renders it through [`PrometheusExporter`].
//!
//! ```text
//!   receive loop ──▶ PipelineMetrics ──▶ PrometheusExporter ──▶ GET /metrics
//!                    (private Registry)
//! ```

pub mod metrics;
pub mod prometheus_exporter;

pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use prometheus_exporter::{PrometheusConfig, PrometheusExporter};
