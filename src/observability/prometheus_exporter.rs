//! Prometheus metrics exporter for the ingestion pipeline
//!
//! Renders the pipeline registry, optionally followed by the process-wide
//! default registry, in the Prometheus text exposition format.

use std::sync::Arc;

use prometheus::{Encoder, TextEncoder};
use tracing::warn;

use super::metrics::PipelineMetrics;

/// Configuration for Prometheus exporter
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Append metrics from the process-wide default registry
    pub include_global_metrics: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            include_global_metrics: true,
        }
    }
}

/// Prometheus metrics exporter
pub struct PrometheusExporter {
    config: PrometheusConfig,
    metrics: Arc<PipelineMetrics>,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    pub fn new(config: PrometheusConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Export metrics in Prometheus text format
    ///
    /// Encoding failures are logged and leave the affected section out.
    pub fn export(&self) -> String {
        let mut output = String::new();

        match encode(&self.metrics.registry().gather()) {
            Ok(pipeline) => output.push_str(&pipeline),
            Err(e) => warn!(error = %e, "Failed to export pipeline metrics"),
        }

        if self.config.include_global_metrics {
            match encode(&prometheus::gather()) {
                Ok(global) => output.push_str(&global),
                Err(e) => warn!(error = %e, "Failed to export global metrics"),
            }
        }

        output
    }

    /// Export metrics as HTTP response body with correct content type
    pub fn export_http(&self) -> (String, &'static str) {
        let body = self.export();
        let content_type = "text/plain; version=0.0.4; charset=utf-8";
        (body, content_type)
    }
}

fn encode(families: &[prometheus::proto::MetricFamily]) -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];

    encoder
        .encode(families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_metrics() -> Arc<PipelineMetrics> {
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        for _ in 0..3 {
            metrics.record_received();
        }
        metrics.record_written();
        metrics.record_alert(1);
        metrics.record_dropped("malformed_payload");
        metrics.record_failure("write");
        metrics
    }

    #[test]
    fn test_prometheus_export_values() {
        let exporter = PrometheusExporter::new(PrometheusConfig::default(), create_test_metrics());
        let output = exporter.export();

        assert!(output.contains("microgrid_pipeline_events_received_total 3"));
        assert!(output.contains("microgrid_pipeline_measurements_written_total 1"));
        assert!(output.contains("microgrid_pipeline_alerts_recorded_total 1"));
        assert!(output.contains("microgrid_pipeline_alert_ledger_size 1"));
        assert!(output
            .contains("microgrid_pipeline_events_dropped_total{reason=\"malformed_payload\"} 1"));
        assert!(output.contains("microgrid_pipeline_dispatch_failures_total{kind=\"write\"} 1"));
        assert!(output.contains("# TYPE microgrid_pipeline_alert_ledger_size gauge"));
    }

    #[test]
    fn test_prometheus_export_http() {
        let config = PrometheusConfig {
            include_global_metrics: false,
        };
        let exporter = PrometheusExporter::new(config, create_test_metrics());

        let (body, content_type) = exporter.export_http();

        assert!(body.contains("# HELP"));
        assert!(content_type.contains("text/plain"));
        assert!(content_type.contains("version=0.0.4"));
    }
}
