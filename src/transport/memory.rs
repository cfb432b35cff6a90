//! In-process broker
//!
//! A broadcast channel standing in for the MQTT broker. Every connected
//! transport sees every frame and keeps only the topics it subscribed to.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use super::{Transport, TransportConnector, TransportEvent};
use crate::error::TransportError;
use crate::types::RawEvent;

const BROKER_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum BrokerFrame {
    Publish(RawEvent),
    Disconnect,
}

/// In-memory broker and connector
pub struct MemoryBroker {
    tx: broadcast::Sender<BrokerFrame>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connects: AtomicUsize,
    unreachable: AtomicBool,
}

impl MemoryBroker {
    /// Create a broker with no sessions
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROKER_CAPACITY);
        Self {
            tx,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            connects: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Deliver a message to every session; returns how many received it
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        self.tx
            .send(BrokerFrame::Publish(RawEvent::new(topic, payload)))
            .unwrap_or(0)
    }

    /// Drop every session; each reconnects on its next receive
    pub fn simulate_disconnect(&self) -> usize {
        self.tx.send(BrokerFrame::Disconnect).unwrap_or(0)
    }

    /// Every topic ever subscribed, in order, including repeats
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Refuse new connections, or accept them again
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "broker unreachable".to_string(),
            ));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryTransport {
            rx: self.tx.subscribe(),
            log: self.subscriptions.clone(),
            topics: Vec::new(),
            pending_connected: true,
        }))
    }
}

struct MemoryTransport {
    rx: broadcast::Receiver<BrokerFrame>,
    log: Arc<Mutex<Vec<String>>>,
    topics: Vec<String>,
    pending_connected: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        self.log.lock().extend(topics.iter().cloned());
        for topic in topics {
            if !self.topics.contains(topic) {
                self.topics.push(topic.clone());
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<TransportEvent, TransportError> {
        if std::mem::take(&mut self.pending_connected) {
            return Ok(TransportEvent::Connected);
        }

        loop {
            match self.rx.recv().await {
                Ok(BrokerFrame::Publish(event)) => {
                    if self.topics.contains(&event.topic) {
                        return Ok(TransportEvent::Message(event));
                    }
                }
                Ok(BrokerFrame::Disconnect) => {
                    // Subscriptions do not survive the session
                    self.topics.clear();
                    self.pending_connected = true;
                    return Ok(TransportEvent::Disconnected(
                        "connection reset by broker".to_string(),
                    ));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Memory transport lagged, frames lost");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.topics.clear();
        Ok(())
    }
}
