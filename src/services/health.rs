//! Health Check Service
//!
//! Builds an on-demand health report for the pipeline:
//! - Ingestion health (supervisor subscribed to the broker)
//! - Time-series health (engine reachable)

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::time::Instant;

use super::ingest::IngestionSupervisor;
use crate::gateway::TimeSeriesGateway;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the health checker
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Timeout for the engine reachability check
    pub check_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Health Status
// ============================================================================

/// Overall health status of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything is working
    Healthy,

    /// Degraded but operational
    Degraded,

    /// Not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if the status indicates the pipeline is operational
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if the status indicates the pipeline is fully healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

// ============================================================================
// Individual Check Results
// ============================================================================

/// Result of a single health check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,

    /// Whether the check passed
    pub passed: bool,

    /// Optional message with details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Duration of the check
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl CheckResult {
    /// Create a passing check result
    pub fn pass(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
            duration,
        }
    }

    /// Create a failing check result
    pub fn fail(name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
            duration,
        }
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

// ============================================================================
// Health Report
// ============================================================================

/// Complete health report with all check results
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall health status
    pub status: HealthStatus,

    /// Individual check results
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// Create a new health report from check results
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let failed_count = checks.iter().filter(|c| !c.passed).count();

        // Determine health status based on failure ratio:
        // - 0 failures: Healthy
        // - Less than half failed: Degraded
        // - Half or more failed: Unhealthy
        let status = if failed_count == 0 {
            HealthStatus::Healthy
        } else if failed_count * 2 < checks.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        Self { status, checks }
    }

    /// Get all failed checks
    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}

// ============================================================================
// Health Checker
// ============================================================================

/// Runs pipeline health checks on request
pub struct HealthChecker {
    config: HealthConfig,
    supervisor: Arc<IngestionSupervisor>,
    gateway: Arc<TimeSeriesGateway>,
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(
        config: HealthConfig,
        supervisor: Arc<IngestionSupervisor>,
        gateway: Arc<TimeSeriesGateway>,
    ) -> Self {
        Self {
            config,
            supervisor,
            gateway,
        }
    }

    /// Run all checks
    pub async fn report(&self) -> HealthReport {
        let start = Instant::now();
        let checks = vec![self.check_ingestion(), self.check_timeseries().await];
        let report = HealthReport::from_checks(checks);

        tracing::debug!(
            status = ?report.status,
            duration_ms = start.elapsed().as_millis(),
            "Health check completed"
        );
        report
    }

    /// The supervisor holds a subscribed session
    fn check_ingestion(&self) -> CheckResult {
        let start = Instant::now();
        let state = self.supervisor.state();

        if state.is_listening() {
            CheckResult::pass("ingestion", start.elapsed())
        } else {
            CheckResult::fail(
                "ingestion",
                format!("Supervisor is {}", state),
                start.elapsed(),
            )
        }
    }

    /// The time-series engine answers a ping
    async fn check_timeseries(&self) -> CheckResult {
        let start = Instant::now();

        match tokio::time::timeout(self.config.check_timeout, self.gateway.ping()).await {
            Ok(Ok(())) => CheckResult::pass("timeseries", start.elapsed()),
            Ok(Err(e)) => CheckResult::fail("timeseries", e.to_string(), start.elapsed()),
            Err(_) => CheckResult::fail(
                "timeseries",
                format!("No answer within {:?}", self.config.check_timeout),
                start.elapsed(),
            ),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::engine::{InMemoryConnector, InMemoryEngine};
    use crate::ledger::AlertLedger;
    use crate::observability::PipelineMetrics;
    use crate::router::EventRouter;
    use crate::services::ingest::Dispatcher;
    use crate::transport::MemoryBroker;

    fn checker() -> (Arc<InMemoryEngine>, Arc<IngestionSupervisor>, HealthChecker) {
        let engine = Arc::new(InMemoryEngine::new());
        let gateway = Arc::new(TimeSeriesGateway::new(Arc::new(InMemoryConnector::new(
            engine.clone(),
        ))));
        let dispatcher = Arc::new(Dispatcher::new(
            EventRouter::default(),
            gateway.clone(),
            Arc::new(AlertLedger::default()),
            Arc::new(PipelineMetrics::new().unwrap()),
        ));
        let supervisor = Arc::new(IngestionSupervisor::new(
            Arc::new(MemoryBroker::new()),
            dispatcher,
            &IngestConfig::default(),
        ));
        let checker = HealthChecker::new(HealthConfig::default(), supervisor.clone(), gateway);
        (engine, supervisor, checker)
    }

    #[test]
    fn test_health_report_from_checks() {
        let d = Duration::from_millis(1);

        let all_pass = HealthReport::from_checks(vec![
            CheckResult::pass("a", d),
            CheckResult::pass("b", d),
        ]);
        assert_eq!(all_pass.status, HealthStatus::Healthy);

        let minority = HealthReport::from_checks(vec![
            CheckResult::pass("a", d),
            CheckResult::pass("b", d),
            CheckResult::fail("c", "down", d),
        ]);
        assert_eq!(minority.status, HealthStatus::Degraded);
        assert!(minority.status.is_operational());

        let half = HealthReport::from_checks(vec![
            CheckResult::pass("a", d),
            CheckResult::fail("b", "down", d),
        ]);
        assert_eq!(half.status, HealthStatus::Unhealthy);
        assert_eq!(half.failed_checks().len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_supervisor_is_unhealthy_ingestion() {
        let (_engine, _supervisor, checker) = checker();
        let report = checker.report().await;

        assert_eq!(report.status, HealthStatus::Unhealthy);
        let failed = report.failed_checks();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "ingestion");
    }

    #[tokio::test]
    async fn test_unreachable_engine() {
        let (engine, supervisor, checker) = checker();
        supervisor.start().await.unwrap();
        for _ in 0..200 {
            if supervisor.state().is_listening() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        engine.set_available(false);

        let report = checker.report().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.failed_checks()[0].name, "timeseries");

        engine.set_available(true);
        assert!(checker.report().await.status.is_healthy());
        supervisor.stop().await;
    }

    #[test]
    fn test_report_serializes() {
        let report = HealthReport::from_checks(vec![CheckResult::fail(
            "timeseries",
            "refused",
            Duration::from_millis(12),
        )]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["checks"][0]["duration_ms"], 12);
        assert_eq!(json["checks"][0]["message"], "refused");
    }
}
