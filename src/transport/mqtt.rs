//! MQTT transport over rumqttc
//!
//! The rumqttc event loop reconnects by itself when polled again after an
//! error, so a dropped connection surfaces as `Disconnected` followed by a
//! fresh `Connected` once the broker answers.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Transport, TransportConnector, TransportEvent};
use crate::config::MqttConfig;
use crate::error::TransportError;
use crate::types::RawEvent;

// rumqttc rejects keep-alives below this
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Client options for `config`, with a unique client id
pub fn mqtt_options(config: &MqttConfig, client_id_prefix: &str) -> MqttOptions {
    let client_id = format!("{}-{}", client_id_prefix, Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive().max(MIN_KEEP_ALIVE));
    options.set_clean_session(true);
    options
}

/// Connects to an MQTT broker
pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    /// Create a connector for the configured broker
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let options = mqtt_options(&self.config, &self.config.client_id_prefix);
        let (client, mut eventloop) = AsyncClient::new(options, self.config.channel_capacity.max(1));

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!(
                        host = %self.config.host,
                        port = self.config.port,
                        code = ?ack.code,
                        "MQTT session established"
                    );
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::ConnectionFailed(e.to_string())),
            }
        }

        Ok(Box::new(MqttTransport {
            client,
            eventloop,
            reconnect_delay: self.config.reconnect_delay(),
            pending_connected: true,
            backoff: false,
        }))
    }
}

struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    reconnect_delay: Duration,
    pending_connected: bool,
    backoff: bool,
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        for topic in topics {
            self.client
                .subscribe(topic.as_str(), QoS::AtMostOnce)
                .await
                .map_err(|e| TransportError::SubscribeFailed(format!("{}: {}", topic, e)))?;
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<TransportEvent, TransportError> {
        if std::mem::take(&mut self.pending_connected) {
            return Ok(TransportEvent::Connected);
        }
        if std::mem::take(&mut self.backoff) {
            tokio::time::sleep(self.reconnect_delay).await;
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(TransportEvent::Connected),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(TransportEvent::Message(RawEvent::new(
                        publish.topic,
                        publish.payload,
                    )));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection lost");
                    self.backoff = true;
                    return Ok(TransportEvent::Disconnected(e.to_string()));
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // The DISCONNECT packet only leaves when the event loop is polled
        let eventloop = &mut self.eventloop;
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush).await.is_err() {
            debug!("MQTT disconnect not flushed before timeout");
        }
        Ok(())
    }
}
