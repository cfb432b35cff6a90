//! Microgrid device simulator
//!
//! Publishes a random telemetry reading on the telemetry topic every
//! `simulator.interval_secs`, plus an alert on the alert topic for each
//! threshold the reading crosses.
//!
//! ```bash
//! MQTT_BROKER_HOST=localhost SIMULATOR_INTERVAL_SECONDS=2 ./simulator
//! ```

use chrono::{SecondsFormat, Utc};
use microgrid_telemetry::{router, transport::mqtt::mqtt_options, Config};
use rand::Rng;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};

// =============================================================================
// Readings
// =============================================================================

/// One simulated device reading
#[derive(Debug, Clone, Serialize)]
struct Reading {
    timestamp: String,
    live_power_consumption: f64,
    live_generation: f64,
    battery_soc: i64,
    temp_equipment: f64,
    solar_irradiance: f64,
}

impl Reading {
    fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            live_power_consumption: round2(rng.random_range(5.0..=15.0)),
            live_generation: round2(rng.random_range(6.0..=16.0)),
            battery_soc: rng.random_range(20..=100),
            temp_equipment: round2(rng.random_range(30.0..=70.0)),
            solar_irradiance: round2(rng.random_range(0.0..=100.0)),
        }
    }

    /// Router-facing payload; the extra keys are ignored downstream
    fn payload(&self) -> Value {
        let mut object = Map::new();
        object.insert("timestamp".into(), self.timestamp.clone().into());
        object.insert(router::KEY_CONSUMPTION.into(), self.live_power_consumption.into());
        object.insert(router::KEY_GENERATION.into(), self.live_generation.into());
        object.insert(router::KEY_BATTERY_SOC.into(), self.battery_soc.into());
        object.insert("temp_equipment".into(), self.temp_equipment.into());
        object.insert("solar_irradiance".into(), self.solar_irradiance.into());
        Value::Object(object)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// Threshold Rules
// =============================================================================

const LOAD_ABNORMALITY: &str = "Load Abnormality: Unusual load increase detected.";
const HIGH_TEMPERATURE: &str = "Predictive alert: high temperature on equipment.";
const LOW_SOLAR_OUTPUT: &str = "Renewable Performance Issue: Solar output is low.";

/// Messages for every rule the reading trips
fn alerts_for(reading: &Reading) -> Vec<&'static str> {
    let mut alerts = Vec::new();
    if reading.live_power_consumption > 14.0 {
        alerts.push(LOAD_ABNORMALITY);
    }
    if reading.temp_equipment > 60.0 {
        alerts.push(HIGH_TEMPERATURE);
    }
    if reading.live_generation < 7.0 && reading.solar_irradiance > 50.0 {
        alerts.push(LOW_SOLAR_OUTPUT);
    }
    alerts
}

#[derive(Debug, Serialize)]
struct AlertMessage<'a> {
    timestamp: &'a str,
    message: &'a str,
}

// =============================================================================
// Publishing
// =============================================================================

type PublishResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

async fn publish_cycle(client: &AsyncClient, config: &Config) -> PublishResult {
    // ThreadRng is not Send; keep it out of the await points
    let reading = Reading::sample(&mut rand::rng());

    let payload = reading.payload().to_string();
    client
        .publish(&config.ingest.telemetry_topic, QoS::AtLeastOnce, false, payload)
        .await?;
    debug!(
        consumption = reading.live_power_consumption,
        generation = reading.live_generation,
        soc = reading.battery_soc,
        "Published telemetry"
    );

    for message in alerts_for(&reading) {
        let alert = serde_json::to_string(&AlertMessage {
            timestamp: &reading.timestamp,
            message,
        })?;
        client
            .publish(&config.ingest.alert_topic, QoS::AtLeastOnce, false, alert)
            .await?;
        info!(alert = message, "Published alert");
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("simulator=info".parse()?),
        )
        .init();

    let config = Config::load();
    let interval = Duration::from_secs(config.simulator.interval_secs.max(1));
    info!(
        host = %config.mqtt.host,
        port = config.mqtt.port,
        interval_secs = interval.as_secs(),
        "Microgrid simulator starting"
    );

    let options = mqtt_options(&config.mqtt, "microgrid-simulator");
    let (client, mut eventloop) = AsyncClient::new(options, config.mqtt.channel_capacity.max(1));

    // The client only makes progress while its event loop is polled
    let reconnect_delay = config.mqtt.reconnect_delay();
    let poller = tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    });

    let mut ticker = tokio::time::interval(interval);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = publish_cycle(&client, &config).await {
                    warn!(error = %e, "Publish failed");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "Disconnect request failed");
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    poller.abort();

    info!("Simulator stopped");
    Ok(())
}
