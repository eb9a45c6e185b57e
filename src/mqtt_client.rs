// MQTT broker session
// Event messages and the BrokerSession seam used by the supervisor (connect,
// liveness) and the publisher (publish). The ESP-IDF implementation runs the
// client's event pump on its own thread and mirrors CONNACK/disconnect
// events into an atomic liveness flag.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::config::Endpoint;

// Topic namespace for sensor events: sensor/<device name>
const TOPIC_SENSOR: &str = "sensor";

/// Broker session shared between the control loop and the publisher task
pub type SharedSession<B> = Mutex<CriticalSectionRawMutex, B>;

/// Broker session owned by the task context
#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    /// Tear down any previous session and establish a new one, resolving once
    /// the broker has acknowledged it
    async fn connect(
        &mut self,
        client_id: &str,
        broker: &Endpoint,
        keep_alive: Duration,
    ) -> anyhow::Result<()>;

    /// Whether the broker session is currently up
    fn is_alive(&self) -> bool;

    /// Fire-and-forget publish
    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;
}

/// JSON body of an event message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub time: u64,
}

/// One event message. Built per publish and not retained afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp_epoch_seconds: u64,
}

impl OutgoingMessage {
    /// Event message for `device_name` stamped with `timestamp_epoch_seconds`
    pub fn sensor_event(device_name: &str, timestamp_epoch_seconds: u64) -> anyhow::Result<Self> {
        let payload = serde_json::to_vec(&EventPayload {
            time: timestamp_epoch_seconds,
        })?;

        Ok(Self {
            topic: event_topic(device_name),
            payload,
            timestamp_epoch_seconds,
        })
    }
}

/// Topic the node publishes its events on
pub fn event_topic(device_name: &str) -> String {
    format!("{}/{}", TOPIC_SENSOR, device_name)
}

#[cfg(target_os = "espidf")]
pub use esp::EspBrokerSession;

#[cfg(target_os = "espidf")]
mod esp {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use anyhow::anyhow;
    use embassy_time::{Duration, Instant, Timer};
    use embedded_svc::mqtt::client::{EventPayload, QoS};
    use esp_idf_svc::mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration};
    use log::{debug, error, info, warn};

    use super::BrokerSession;
    use crate::config::Endpoint;

    const CONNACK_POLL_MS: u64 = 100;
    const EVENT_PUMP_STACK_SIZE: usize = 6 * 1024;

    /// ESP-IDF MQTT session with a dedicated event pump thread
    pub struct EspBrokerSession {
        client: Option<EspMqttClient<'static>>,
        alive: Arc<AtomicBool>,
        connect_timeout: Duration,
    }

    impl EspBrokerSession {
        pub fn new(connect_timeout: Duration) -> Self {
            Self {
                client: None,
                alive: Arc::new(AtomicBool::new(false)),
                connect_timeout,
            }
        }

        // Drains connection events until the client is dropped
        fn spawn_event_pump(
            mut connection: EspMqttConnection,
            alive: Arc<AtomicBool>,
        ) -> anyhow::Result<()> {
            std::thread::Builder::new()
                .name("mqtt-events".into())
                .stack_size(EVENT_PUMP_STACK_SIZE)
                .spawn(move || {
                    while let Ok(event) = connection.next() {
                        match event.payload() {
                            EventPayload::Connected(_) => {
                                info!("🔗 MQTT session acknowledged by broker");
                                alive.store(true, Ordering::Release);
                            }
                            EventPayload::Disconnected => {
                                warn!("🔌 MQTT session lost");
                                alive.store(false, Ordering::Release);
                            }
                            EventPayload::Error(e) => {
                                debug!("MQTT error event: {:?}", e);
                            }
                            _ => {}
                        }
                    }
                    alive.store(false, Ordering::Release);
                    debug!("MQTT event pump finished");
                })?;
            Ok(())
        }
    }

    impl BrokerSession for EspBrokerSession {
        async fn connect(
            &mut self,
            client_id: &str,
            broker: &Endpoint,
            keep_alive: Duration,
        ) -> anyhow::Result<()> {
            // Dropping the old client stops its pump thread
            self.client = None;
            self.alive = Arc::new(AtomicBool::new(false));

            let broker_url = format!("mqtt://{}", broker);
            info!("🔌 Connecting to MQTT broker {} as {}", broker_url, client_id);

            let mqtt_config = MqttClientConfiguration {
                client_id: Some(client_id),
                keep_alive_interval: Some(std::time::Duration::from_secs(keep_alive.as_secs())),
                network_timeout: std::time::Duration::from_secs(self.connect_timeout.as_secs()),
                ..Default::default()
            };

            let (client, connection) = EspMqttClient::new(&broker_url, &mqtt_config)
                .map_err(|e| anyhow!("Failed to create MQTT client: {:?}", e))?;
            Self::spawn_event_pump(connection, self.alive.clone())?;
            self.client = Some(client);

            let deadline = Instant::now() + self.connect_timeout;
            while Instant::now() < deadline {
                if self.alive.load(Ordering::Acquire) {
                    info!("✅ MQTT session established with {}", broker);
                    return Ok(());
                }
                Timer::after(Duration::from_millis(CONNACK_POLL_MS)).await;
            }

            error!("❌ No CONNACK from {} within {}s", broker, self.connect_timeout.as_secs());
            self.client = None;
            Err(anyhow!("MQTT broker did not acknowledge the session"))
        }

        fn is_alive(&self) -> bool {
            self.client.is_some() && self.alive.load(Ordering::Acquire)
        }

        fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
            let client = self
                .client
                .as_mut()
                .ok_or_else(|| anyhow!("MQTT client not initialized"))?;

            client
                .publish(topic, QoS::AtMostOnce, false, payload)
                .map_err(|e| anyhow!("Failed to publish to topic {}: {:?}", topic, e))?;

            debug!("📤 Published {} bytes to {}", payload.len(), topic);
            Ok(())
        }
    }
}
