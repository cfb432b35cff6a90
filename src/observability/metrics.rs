//! Pipeline counters

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Default metric name prefix
pub const DEFAULT_METRIC_PREFIX: &str = "microgrid_pipeline";

/// Counters reported by the receive loop
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    events_received: IntCounter,
    measurements_written: IntCounter,
    alerts_recorded: IntCounter,
    events_dropped: IntCounterVec,
    dispatch_failures: IntCounterVec,
    alert_ledger_size: IntGauge,
}

/// Point-in-time copy of the scalar counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events handed over by the transport
    pub events_received: u64,
    /// Samples written to the engine
    pub measurements_written: u64,
    /// Alerts added to the ledger
    pub alerts_recorded: u64,
    /// Current ledger occupancy
    pub alert_ledger_size: i64,
}

impl PipelineMetrics {
    /// Create counters under the default prefix
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_prefix(DEFAULT_METRIC_PREFIX)
    }

    /// Create counters in a fresh registry whose names start with `prefix`
    pub fn with_prefix(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some(prefix.to_string()), None)?;

        let events_received = IntCounter::new(
            "events_received_total",
            "Events received from the transport",
        )?;
        let measurements_written = IntCounter::new(
            "measurements_written_total",
            "Measurement samples written to the time-series engine",
        )?;
        let alerts_recorded =
            IntCounter::new("alerts_recorded_total", "Alerts added to the ledger")?;
        let events_dropped = IntCounterVec::new(
            Opts::new("events_dropped_total", "Events discarded by the router"),
            &["reason"],
        )?;
        let dispatch_failures = IntCounterVec::new(
            Opts::new(
                "dispatch_failures_total",
                "Events whose dispatch failed at the loop boundary",
            ),
            &["kind"],
        )?;
        let alert_ledger_size =
            IntGauge::new("alert_ledger_size", "Alerts currently held in the ledger")?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(measurements_written.clone()))?;
        registry.register(Box::new(alerts_recorded.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(dispatch_failures.clone()))?;
        registry.register(Box::new(alert_ledger_size.clone()))?;

        Ok(Self {
            registry,
            events_received,
            measurements_written,
            alerts_recorded,
            events_dropped,
            dispatch_failures,
            alert_ledger_size,
        })
    }

    /// Registry holding every pipeline metric
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_received(&self) {
        self.events_received.inc();
    }

    pub fn record_written(&self) {
        self.measurements_written.inc();
    }

    /// Count an alert and publish the ledger's new size
    pub fn record_alert(&self, ledger_len: usize) {
        self.alerts_recorded.inc();
        self.alert_ledger_size
            .set(i64::try_from(ledger_len).unwrap_or(i64::MAX));
    }

    pub fn record_dropped(&self, reason: &str) {
        self.events_dropped.with_label_values(&[reason]).inc();
    }

    pub fn record_failure(&self, kind: &str) {
        self.dispatch_failures.with_label_values(&[kind]).inc();
    }

    /// Drops recorded under `reason`
    pub fn dropped(&self, reason: &str) -> u64 {
        self.events_dropped.with_label_values(&[reason]).get()
    }

    /// Dispatch failures recorded under `kind`
    pub fn failures(&self, kind: &str) -> u64 {
        self.dispatch_failures.with_label_values(&[kind]).get()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.get(),
            measurements_written: self.measurements_written.get(),
            alerts_recorded: self.alerts_recorded.get(),
            alert_ledger_size: self.alert_ledger_size.get(),
        }
    }
}
