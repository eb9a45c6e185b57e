// Device configuration
// Validated network/broker/coordinator identity, loaded once at boot from the
// JSON document on the config partition

use std::path::Path;

use embassy_time::Duration;
use log::{debug, info};
use serde::Deserialize;

// Defaults for the optional "Timing" section
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WIFI_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_BROKER_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_REGISTRATION_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// Configuration errors. Any of these halts the boot sequence.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    EmptyField(&'static str),
    ZeroPort(&'static str),
    InvalidDeviceName(String),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Config file unreadable: {}", e),
            ConfigError::Parse(e) => write!(f, "Config file is not valid JSON: {}", e),
            ConfigError::EmptyField(field) => write!(f, "Config field {} must not be empty", field),
            ConfigError::ZeroPort(field) => write!(f, "Config field {} must not be zero", field),
            ConfigError::InvalidDeviceName(name) => write!(
                f,
                "Device name {:?} may only contain letters, digits, '_' and '-'",
                name
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

/// Wi-Fi station credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub passphrase: String,
}

/// A host/port pair for the broker or the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl core::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Timing knobs for the connectivity and registration loops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTiming {
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub wifi_retry_delay: Duration,
    pub broker_retry_delay: Duration,
    pub registration_retry_delay: Duration,
    pub http_timeout: Duration,
    pub keep_alive: Duration,
}

impl Default for NodeTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            wifi_retry_delay: Duration::from_secs(DEFAULT_WIFI_RETRY_DELAY_SECS),
            broker_retry_delay: Duration::from_secs(DEFAULT_BROKER_RETRY_DELAY_SECS),
            registration_retry_delay: Duration::from_secs(DEFAULT_REGISTRATION_RETRY_DELAY_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
        }
    }
}

/// Device identity and addressing. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_name: String,
    pub wifi: WifiCredentials,
    pub broker: Endpoint,
    pub coordinator: Endpoint,
    pub timing: NodeTiming,
}

// On-disk layout, field names as written by the provisioning tooling
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "WiFiSSID")]
    wifi_ssid: String,
    #[serde(rename = "WiFiPassword")]
    wifi_password: String,
    #[serde(rename = "DeviceName")]
    device_name: String,
    #[serde(rename = "MQTT")]
    mqtt: RawEndpoint,
    #[serde(rename = "HTTP")]
    http: RawEndpoint,
    #[serde(rename = "Timing", default)]
    timing: RawTiming,
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    #[serde(rename = "IP")]
    ip: String,
    #[serde(rename = "Port")]
    port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTiming {
    poll_interval_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    wifi_retry_delay_secs: Option<u64>,
    broker_retry_delay_secs: Option<u64>,
    registration_retry_delay_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    keep_alive_secs: Option<u64>,
}

impl From<RawTiming> for NodeTiming {
    fn from(raw: RawTiming) -> Self {
        let defaults = NodeTiming::default();
        let secs = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };

        Self {
            poll_interval: secs(raw.poll_interval_secs, defaults.poll_interval),
            connect_timeout: secs(raw.connect_timeout_secs, defaults.connect_timeout),
            wifi_retry_delay: secs(raw.wifi_retry_delay_secs, defaults.wifi_retry_delay),
            broker_retry_delay: secs(raw.broker_retry_delay_secs, defaults.broker_retry_delay),
            registration_retry_delay: secs(
                raw.registration_retry_delay_secs,
                defaults.registration_retry_delay,
            ),
            http_timeout: secs(raw.http_timeout_secs, defaults.http_timeout),
            keep_alive: secs(raw.keep_alive_secs, defaults.keep_alive),
        }
    }
}

impl DeviceConfig {
    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json).map_err(ConfigError::Parse)?;

        let config = Self {
            device_name: raw.device_name,
            wifi: WifiCredentials {
                ssid: raw.wifi_ssid,
                passphrase: raw.wifi_password,
            },
            broker: Endpoint {
                host: raw.mqtt.ip,
                port: raw.mqtt.port,
            },
            coordinator: Endpoint {
                host: raw.http.ip,
                port: raw.http.port,
            },
            timing: raw.timing.into(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("📄 Loading device configuration from {}", path.display());

        let json = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config = Self::from_json(&json)?;

        info!("✅ Configuration loaded for device: {}", config.device_name);
        debug!("  Wi-Fi SSID: {}", config.wifi.ssid);
        debug!("  Broker: {}", config.broker);
        debug!("  Coordinator: {}", config.coordinator);
        Ok(config)
    }

    /// Check that every field is usable before the supervisor starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("DeviceName", &self.device_name),
            ("WiFiSSID", &self.wifi.ssid),
            ("WiFiPassword", &self.wifi.passphrase),
            ("MQTT.IP", &self.broker.host),
            ("HTTP.IP", &self.coordinator.host),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }

        if self.broker.port == 0 {
            return Err(ConfigError::ZeroPort("MQTT.Port"));
        }
        if self.coordinator.port == 0 {
            return Err(ConfigError::ZeroPort("HTTP.Port"));
        }

        // The name is both the MQTT client id and a topic level
        let name_ok = self
            .device_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !name_ok {
            return Err(ConfigError::InvalidDeviceName(self.device_name.clone()));
        }

        Ok(())
    }

    /// Base URL of the coordinator's HTTP API
    pub fn coordinator_base_url(&self) -> String {
        format!("http://{}", self.coordinator)
    }
}
