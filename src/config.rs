//! Pipeline configuration
//!
//! Configuration is read from:
//! 1. The TOML file named by the `PIPELINE_CONFIG` environment variable
//! 2. `./pipeline.toml` in the current directory
//! 3. Built-in defaults
//!
//! Environment variables (`INFLUX_URL`, `MQTT_BROKER_HOST`, `API_TOKEN`, ...)
//! are applied on top of whichever source won.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ledger::DEFAULT_ALERT_CAPACITY;
use crate::types::MEASUREMENT_NAME;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "PIPELINE_CONFIG";

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

// =============================================================================
// Sections
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP surface
    #[serde(default)]
    pub server: ServerConfig,

    /// Time-series engine
    #[serde(default)]
    pub influx: InfluxConfig,

    /// MQTT broker
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Ingestion supervisor
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Alert ledger
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Device simulator
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Shared secret handed out by the login endpoint
    #[serde(default = "default_api_token")]
    pub api_token: String,

    /// Login user name
    #[serde(default = "default_username")]
    pub username: String,

    /// Login password
    #[serde(default = "default_password")]
    pub password: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_api_token() -> String {
    "prototype_token".to_string()
}

fn default_username() -> String {
    "user".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_token: default_api_token(),
            username: default_username(),
            password: default_password(),
        }
    }
}

/// InfluxDB v2 settings
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// Base URL
    #[serde(default = "default_influx_url")]
    pub url: String,

    /// Organisation
    #[serde(default = "default_influx_name")]
    pub org: String,

    /// Bucket holding the measurement
    #[serde(default = "default_influx_name")]
    pub bucket: String,

    /// API token
    #[serde(default)]
    pub token: String,

    /// Measurement every sample is written to
    #[serde(default = "default_measurement")]
    pub measurement: String,

    /// Per-request I/O timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_influx_name() -> String {
    "solnova".to_string()
}

fn default_measurement() -> String {
    MEASUREMENT_NAME.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: default_influx_url(),
            org: default_influx_name(),
            bucket: default_influx_name(),
            token: String::new(),
            measurement: default_measurement(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl InfluxConfig {
    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker host
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client id prefix; a random suffix is appended per connection
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Keep-alive interval
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Pause before the client retries a dropped connection
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Request channel capacity of the client
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "microgrid-ingest".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl MqttConfig {
    /// Keep-alive as a `Duration`
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Reconnect delay as a `Duration`
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Ingestion supervisor settings
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Topic carrying telemetry payloads
    #[serde(default = "default_telemetry_topic")]
    pub telemetry_topic: String,

    /// Topic carrying alert payloads
    #[serde(default = "default_alert_topic")]
    pub alert_topic: String,

    /// Upper bound on the initial broker connect
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Keep the loop alive across transport disconnects
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Pause between connect attempts while no session has been established
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
}

fn default_telemetry_topic() -> String {
    "microgrid/data".to_string()
}

fn default_alert_topic() -> String {
    "microgrid/alerts".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_connect_retry_ms() -> u64 {
    1000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            telemetry_topic: default_telemetry_topic(),
            alert_topic: default_alert_topic(),
            connect_timeout_secs: default_connect_timeout_secs(),
            auto_reconnect: true,
            connect_retry_ms: default_connect_retry_ms(),
        }
    }
}

impl IngestConfig {
    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Connect retry pause as a `Duration`
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }
}

/// Alert ledger settings
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Maximum number of retained alerts
    #[serde(default = "default_alert_capacity")]
    pub capacity: usize,
}

fn default_alert_capacity() -> usize {
    DEFAULT_ALERT_CAPACITY
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            capacity: default_alert_capacity(),
        }
    }
}

/// Device simulator settings
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Seconds between published samples
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    5
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Read and parse a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from file or defaults, then apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::load_file();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    fn load_file() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            match Self::from_file(&path) {
                Ok(config) => {
                    info!(path = %path, "Loaded configuration from file");
                    return config;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to load config file, using defaults");
                    return Self::default();
                }
            }
        }

        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            match Self::from_file(DEFAULT_CONFIG_FILE) {
                Ok(config) => {
                    info!("Loaded configuration from {}", DEFAULT_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load {}, using defaults", DEFAULT_CONFIG_FILE);
                }
            }
        }

        info!("Using default configuration");
        Self::default()
    }

    /// Apply overrides from a key lookup, normally the process environment
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("INFLUX_URL") {
            self.influx.url = v;
        }
        if let Some(v) = lookup("INFLUX_ORG") {
            self.influx.org = v;
        }
        if let Some(v) = lookup("INFLUX_BUCKET") {
            self.influx.bucket = v;
        }
        if let Some(v) = lookup("INFLUX_TOKEN") {
            self.influx.token = v;
        }
        if let Some(v) = lookup("MQTT_BROKER_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = lookup("MQTT_BROKER_PORT") {
            match v.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => warn!(value = %v, "Ignoring invalid MQTT_BROKER_PORT"),
            }
        }
        if let Some(v) = lookup("API_TOKEN") {
            self.server.api_token = v;
        }
        if let Some(v) = lookup("SIMULATOR_INTERVAL_SECONDS") {
            match v.parse() {
                Ok(secs) => self.simulator.interval_secs = secs,
                Err(_) => warn!(value = %v, "Ignoring invalid SIMULATOR_INTERVAL_SECONDS"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8000");
        assert_eq!(config.influx.url, "http://localhost:8086");
        assert_eq!(config.influx.measurement, "microgrid");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.ingest.telemetry_topic, "microgrid/data");
        assert_eq!(config.ingest.alert_topic, "microgrid/alerts");
        assert!(config.ingest.auto_reconnect);
        assert_eq!(config.ingest.connect_retry(), Duration::from_secs(1));
        assert_eq!(config.alerts.capacity, 1000);
        assert_eq!(config.simulator.interval_secs, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [influx]
            bucket = "grid"
            request_timeout_secs = 3

            [alerts]
            capacity = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.influx.bucket, "grid");
        assert_eq!(config.influx.org, "solnova");
        assert_eq!(config.influx.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.alerts.capacity, 50);
        assert_eq!(config.mqtt.host, "localhost");
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[alerts]\ncapacity = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt]\nhost = \"broker.local\"\nport = 8883").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("INFLUX_URL", "http://influx:8086"),
            ("INFLUX_TOKEN", "secret"),
            ("MQTT_BROKER_HOST", "mosquitto"),
            ("MQTT_BROKER_PORT", "not-a-port"),
            ("API_TOKEN", "shared"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.influx.url, "http://influx:8086");
        assert_eq!(config.influx.token, "secret");
        assert_eq!(config.mqtt.host, "mosquitto");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.server.api_token, "shared");
        assert_eq!(config.influx.bucket, "solnova");
    }
}
