//! Sensor node firmware core.
//!
//! Keeps a Wi-Fi and MQTT session alive, registers the node with its
//! coordinator over HTTP, then reports each rising edge on the sensor pin as
//! a timestamped MQTT message. Hardware seams are traits; their ESP-IDF
//! implementations are compiled only for `target_os = "espidf"`.

pub mod api;
pub mod config;
pub mod connectivity;
pub mod event_signal;
pub mod mqtt_client;
pub mod node;
pub mod publisher;
pub mod registration;
pub mod sensor_input;
pub mod storage;
pub mod system_state;
pub mod wifi_client;

#[cfg(target_os = "espidf")]
pub mod time_sync;

#[cfg(test)]
pub(crate) mod mock;
