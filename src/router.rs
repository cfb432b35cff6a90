//! Event Router
//!
//! Classifies a raw transport event by topic and payload shape. The router
//! never fails: anything it cannot use becomes [`Action::Drop`] with a reason.

use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

use crate::config::IngestConfig;
use crate::types::{MeasurementSample, RawEvent, Severity};

/// Payload key carrying consumption in kW
pub const KEY_CONSUMPTION: &str = "live_power_consumption";
/// Payload key carrying generation in kW
pub const KEY_GENERATION: &str = "live_generation";
/// Payload key carrying battery state of charge
pub const KEY_BATTERY_SOC: &str = "battery_soc";

/// What to do with an event
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Append a measurement sample
    WriteMeasurement(MeasurementSample),
    /// Record an alert in the ledger
    RecordAlert {
        /// Alert text
        message: String,
        /// Source timestamp, unparsed
        timestamp: String,
        /// Severity, defaulted when absent or unknown
        severity: Severity,
    },
    /// Discard the event
    Drop(DropReason),
}

/// Why an event was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Topic is neither telemetry nor alerts
    UnknownTopic,
    /// Payload is not a UTF-8 JSON object
    MalformedPayload,
    /// Alert payload lacks a required key
    MissingField(&'static str),
}

impl DropReason {
    /// Short label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::UnknownTopic => "unknown_topic",
            DropReason::MalformedPayload => "malformed_payload",
            DropReason::MissingField(_) => "missing_field",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingField(key) => write!(f, "missing field '{}'", key),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Topic-keyed classifier
#[derive(Debug, Clone)]
pub struct EventRouter {
    telemetry_topic: String,
    alert_topic: String,
}

impl EventRouter {
    /// Create a router for the given topics
    pub fn new(telemetry_topic: impl Into<String>, alert_topic: impl Into<String>) -> Self {
        Self {
            telemetry_topic: telemetry_topic.into(),
            alert_topic: alert_topic.into(),
        }
    }

    /// Create a router from ingestion settings
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.telemetry_topic.clone(), config.alert_topic.clone())
    }

    /// Topic carrying telemetry
    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    /// Topic carrying alerts
    pub fn alert_topic(&self) -> &str {
        &self.alert_topic
    }

    /// Exactly the topics the router understands
    pub fn topics(&self) -> Vec<String> {
        vec![self.telemetry_topic.clone(), self.alert_topic.clone()]
    }

    /// Classify a raw event
    pub fn route(&self, event: &RawEvent) -> Action {
        self.classify(&event.topic, &event.payload)
    }

    /// Classify a payload received on `topic`
    pub fn classify(&self, topic: &str, payload: &[u8]) -> Action {
        let is_telemetry = topic == self.telemetry_topic;
        if !is_telemetry && topic != self.alert_topic {
            return Action::Drop(DropReason::UnknownTopic);
        }

        let object = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                debug!(topic = %topic, kind = json_kind(&other), "Dropping non-object payload");
                return Action::Drop(DropReason::MalformedPayload);
            }
            Err(e) => {
                debug!(topic = %topic, error = %e, "Dropping malformed payload");
                return Action::Drop(DropReason::MalformedPayload);
            }
        };

        if is_telemetry {
            Action::WriteMeasurement(measurement_from(&object))
        } else {
            alert_from(&object)
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// Missing or non-numeric values count as zero
fn measurement_from(object: &Map<String, Value>) -> MeasurementSample {
    let consumption = number(object, KEY_CONSUMPTION);
    let generation = number(object, KEY_GENERATION);
    let soc = number(object, KEY_BATTERY_SOC);

    MeasurementSample::new(consumption, generation, soc.trunc() as i64)
}

fn number(object: &Map<String, Value>, key: &str) -> f64 {
    match object.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Both `message` and `timestamp` must be non-empty strings
fn alert_from(object: &Map<String, Value>) -> Action {
    let Some(message) = non_empty_str(object, "message") else {
        return Action::Drop(DropReason::MissingField("message"));
    };
    let Some(timestamp) = non_empty_str(object, "timestamp") else {
        return Action::Drop(DropReason::MissingField("timestamp"));
    };

    let severity = non_empty_str(object, "severity")
        .and_then(Severity::parse)
        .unwrap_or_default();

    Action::RecordAlert {
        message: message.to_string(),
        timestamp: timestamp.to_string(),
        severity,
    }
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> EventRouter {
        EventRouter::default()
    }

    #[test]
    fn test_telemetry_full_payload() {
        let action = router().classify(
            "microgrid/data",
            br#"{"live_power_consumption": 9.5, "live_generation": 11.2, "battery_soc": 76}"#,
        );
        assert_eq!(
            action,
            Action::WriteMeasurement(MeasurementSample::new(9.5, 11.2, 76))
        );
    }

    #[test]
    fn test_telemetry_missing_soc_defaults_to_zero() {
        let action = router().classify(
            "microgrid/data",
            br#"{"live_power_consumption": 9.5, "live_generation": 11.2}"#,
        );
        match action {
            Action::WriteMeasurement(sample) => {
                assert_eq!(sample.battery_soc, 0);
                assert_eq!(sample.consumption_kw, 9.5);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_telemetry_empty_object_writes_zeros() {
        let action = router().classify("microgrid/data", b"{}");
        assert_eq!(
            action,
            Action::WriteMeasurement(MeasurementSample::new(0.0, 0.0, 0))
        );
    }

    #[test]
    fn test_telemetry_tolerates_extra_and_odd_values() {
        let action = router().classify(
            "microgrid/data",
            br#"{"timestamp": "2024-01-01T00:00:00Z", "temp_equipment": 61.0,
                 "live_power_consumption": "12.5", "live_generation": null, "battery_soc": 80.9}"#,
        );
        assert_eq!(
            action,
            Action::WriteMeasurement(MeasurementSample::new(12.5, 0.0, 80))
        );
    }

    #[test]
    fn test_alert_payload() {
        let action = router().classify(
            "microgrid/alerts",
            br#"{"message": "High temp", "timestamp": "2024-01-01T00:00:00Z", "severity": "critical"}"#,
        );
        assert_eq!(
            action,
            Action::RecordAlert {
                message: "High temp".to_string(),
                timestamp: "2024-01-01T00:00:00Z".to_string(),
                severity: Severity::Critical,
            }
        );
    }

    #[test]
    fn test_alert_unknown_severity_defaults() {
        let action = router().classify(
            "microgrid/alerts",
            br#"{"message": "High temp", "timestamp": "2024-01-01T00:00:00Z", "severity": "meh"}"#,
        );
        assert!(matches!(
            action,
            Action::RecordAlert { severity: Severity::Warning, .. }
        ));
    }

    #[test]
    fn test_alert_missing_timestamp_is_dropped() {
        let action = router().classify("microgrid/alerts", br#"{"message": "High temp"}"#);
        assert_eq!(action, Action::Drop(DropReason::MissingField("timestamp")));
    }

    #[test]
    fn test_alert_empty_message_is_dropped() {
        let action = router().classify(
            "microgrid/alerts",
            br#"{"message": "", "timestamp": "2024-01-01T00:00:00Z"}"#,
        );
        assert_eq!(action, Action::Drop(DropReason::MissingField("message")));
    }

    #[test]
    fn test_malformed_payloads() {
        let r = router();
        let payloads: [&[u8]; 4] = [b"not json", b"[1, 2, 3]", b"42", &[0xff, 0xfe, 0x00]];
        for payload in payloads {
            assert_eq!(
                r.classify("microgrid/data", payload),
                Action::Drop(DropReason::MalformedPayload)
            );
            assert_eq!(
                r.classify("microgrid/alerts", payload),
                Action::Drop(DropReason::MalformedPayload)
            );
        }
    }

    #[test]
    fn test_unknown_topic() {
        let action = router().classify("microgrid/other", br#"{"message": "x"}"#);
        assert_eq!(action, Action::Drop(DropReason::UnknownTopic));
        assert_eq!(DropReason::UnknownTopic.as_str(), "unknown_topic");
    }

    #[test]
    fn test_route_raw_event_and_topics() {
        let r = EventRouter::new("site/telemetry", "site/alerts");
        let event = RawEvent::new("site/telemetry", &b"{\"battery_soc\": 50}"[..]);
        assert!(matches!(r.route(&event), Action::WriteMeasurement(_)));
        assert_eq!(r.topics(), vec!["site/telemetry", "site/alerts"]);
    }
}
