//! Alert Ledger
//!
//! Bounded, newest-first, in-memory store of alert records. The ledger is a
//! volatile view of recent alerts, not a store of record: there is no
//! removal, update or persistence path, and the oldest record is evicted
//! silently once capacity is exceeded.

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDateTime};
use parking_lot::RwLock;

use crate::error::LedgerError;
use crate::types::{Alert, Severity};

/// Default number of retained alerts
pub const DEFAULT_ALERT_CAPACITY: usize = 1000;

struct LedgerInner {
    /// Newest first
    alerts: VecDeque<Alert>,
    /// Total insertions since construction
    inserted: u64,
}

/// Bounded ring buffer of alerts
///
/// Safe for one writer (the ingestion loop) and many concurrent readers.
/// A single lock guards the container, so `list` always observes whole
/// records as of some point between two `add` calls.
pub struct AlertLedger {
    capacity: usize,
    inner: RwLock<LedgerInner>,
}

impl AlertLedger {
    /// Create a ledger holding at most `capacity` alerts (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(LedgerInner {
                alerts: VecDeque::with_capacity(capacity),
                inserted: 0,
            }),
        }
    }

    /// Maximum number of retained alerts
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of retained alerts
    pub fn len(&self) -> usize {
        self.inner.read().alerts.len()
    }

    /// Whether the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().alerts.is_empty()
    }

    /// Record an alert with the default severity
    pub fn add(&self, message: impl Into<String>, timestamp: &str) -> Result<Alert, LedgerError> {
        self.add_with_severity(message, timestamp, Severity::default())
    }

    /// Record an alert
    ///
    /// The id is `alert-<epoch seconds>-<position>`, where position is the
    /// ledger's insertion sequence number. Until the first eviction that
    /// equals the occupancy count at insertion time; afterwards it keeps
    /// growing so ids stay unique within the retained window.
    ///
    /// An unparseable timestamp fails without touching the ledger.
    pub fn add_with_severity(
        &self,
        message: impl Into<String>,
        timestamp: &str,
        severity: Severity,
    ) -> Result<Alert, LedgerError> {
        let epoch_secs = parse_epoch_seconds(timestamp)?;

        let mut inner = self.inner.write();
        let alert = Alert {
            id: format!("alert-{}-{}", epoch_secs, inner.inserted),
            message: message.into(),
            timestamp: timestamp.to_string(),
            severity,
        };

        inner.inserted += 1;
        inner.alerts.push_front(alert.clone());
        if inner.alerts.len() > self.capacity {
            inner.alerts.pop_back();
        }

        Ok(alert)
    }

    /// Snapshot of all retained alerts, newest first
    pub fn list(&self) -> Vec<Alert> {
        self.inner.read().alerts.iter().cloned().collect()
    }
}

impl Default for AlertLedger {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY)
    }
}

/// Parse an ISO-8601 timestamp into Unix epoch seconds.
///
/// Accepts RFC 3339 (`Z` or numeric offset) and offset-less timestamps,
/// which are taken as UTC.
fn parse_epoch_seconds(timestamp: &str) -> Result<i64, LedgerError> {
    let trimmed = timestamp.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp());
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().timestamp())
        .map_err(|e| LedgerError::InvalidTimestamp {
            timestamp: timestamp.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_add_assigns_id_and_default_severity() {
        let ledger = AlertLedger::default();
        let alert = ledger.add("High temp", "2024-01-01T00:00:00Z").unwrap();

        assert_eq!(alert.id, "alert-1704067200-0");
        assert_eq!(alert.message, "High temp");
        assert_eq!(alert.timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(ledger.list(), vec![alert]);
    }

    #[test]
    fn test_timestamp_formats() {
        let ledger = AlertLedger::default();
        let a = ledger.add("offset", "2024-01-01T02:00:00+02:00").unwrap();
        let b = ledger.add("naive", "2024-01-01T00:00:00.250").unwrap();

        assert!(a.id.starts_with("alert-1704067200-"));
        assert!(b.id.starts_with("alert-1704067200-"));
    }

    #[test]
    fn test_same_timestamp_yields_distinct_ids() {
        let ledger = AlertLedger::default();
        let a = ledger.add("first", "2024-01-01T00:00:00Z").unwrap();
        let b = ledger.add("second", "2024-01-01T00:00:00Z").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_invalid_timestamp_does_not_mutate() {
        let ledger = AlertLedger::default();
        ledger.add("kept", "2024-01-01T00:00:00Z").unwrap();

        let err = ledger.add("rejected", "yesterday").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTimestamp { .. }));
        assert_eq!(ledger.len(), 1);

        // The failed call must not consume a position either
        let next = ledger.add("next", "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(next.id, "alert-1704067200-1");
    }

    #[test]
    fn test_capacity_eviction_is_fifo() {
        let ledger = AlertLedger::new(3);
        for i in 0..5 {
            ledger
                .add(format!("alert {i}"), "2024-01-01T00:00:00Z")
                .unwrap();
        }

        let messages: Vec<_> = ledger.list().into_iter().map(|a| a.message).collect();
        assert_eq!(messages, vec!["alert 4", "alert 3", "alert 2"]);
        assert_eq!(ledger.len(), ledger.capacity());
    }

    #[test]
    fn test_ids_stay_unique_when_full() {
        let ledger = AlertLedger::new(4);
        for _ in 0..20 {
            ledger.add("same", "2024-01-01T00:00:00Z").unwrap();
        }
        let ids: HashSet<_> = ledger.list().into_iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let ledger = AlertLedger::new(0);
        ledger.add("a", "2024-01-01T00:00:00Z").unwrap();
        ledger.add("b", "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(ledger.capacity(), 1);
        assert_eq!(ledger.list()[0].message, "b");
    }

    #[test]
    fn test_concurrent_add_and_list() {
        let ledger = Arc::new(AlertLedger::new(100));

        let writer = {
            let ledger = ledger.clone();
            std::thread::spawn(move || {
                for i in 0..1_000 {
                    ledger
                        .add(format!("alert {i}"), "2024-01-01T00:00:00Z")
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = ledger.list();
                        assert!(snapshot.len() <= 100);
                        assert!(snapshot.iter().all(|a| !a.id.is_empty()));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        let alerts = ledger.list();
        assert_eq!(alerts.len(), 100);
        assert_eq!(alerts[0].message, "alert 999");
        assert_eq!(alerts[99].message, "alert 900");
    }
}
