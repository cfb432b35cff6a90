//! Event transport seam
//!
//! The ingestion supervisor talks to the broker only through these traits.
//! Reconnection after a dropped connection is the transport client's job:
//! it reports [`TransportEvent::Disconnected`] and later
//! [`TransportEvent::Connected`] again, and the supervisor re-subscribes.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::RawEvent;

pub mod memory;
pub mod mqtt;

pub use memory::MemoryBroker;
pub use mqtt::MqttConnector;

/// Something the transport has to report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A (re)established session; subscriptions must be (re)registered
    Connected,
    /// A message on a subscribed topic
    Message(RawEvent),
    /// The session dropped; the client retries on the next `recv`
    Disconnected(String),
}

/// An established broker session
#[async_trait]
pub trait Transport: Send {
    /// Register interest in `topics`
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError>;

    /// Wait for the next event. An error means the transport is unusable.
    async fn recv(&mut self) -> Result<TransportEvent, TransportError>;

    /// Tear the session down
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Opens broker sessions
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect; the returned transport reports `Connected` first
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}
