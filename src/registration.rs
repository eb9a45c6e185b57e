use embassy_time::{with_timeout, Duration, Timer};
use log::{debug, info, warn};
use serde::Serialize;

use crate::api::CoordinatorApi;
use crate::config::DeviceConfig;
use crate::system_state::{ConnectionState, ConnectionStatus};

/// Coordinator endpoint for device registration
pub const REGISTER_ENDPOINT: &str = "/api/device/register";

/// Status the coordinator answers with once it knows the device
pub const REGISTERED_STATUS: u16 = 204;

const DEVICE_TYPE: &str = "sensor";

/// Device registration request payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
}

impl RegistrationRequest {
    pub fn sensor(device_name: &str) -> Self {
        Self {
            name: device_name.to_string(),
            device_type: DEVICE_TYPE.to_string(),
        }
    }
}

/// Progress of the registration phase. Discarded once acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationAttempt {
    pub count: u32,
    pub last_status: Option<u16>,
}

/// Outcome of a completed registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    pub attempts: u32,
}

#[derive(Debug)]
pub enum RegistrationError {
    NotReady(ConnectionState),
    Encode(serde_json::Error),
}

impl core::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegistrationError::NotReady(state) => {
                write!(f, "Registration requires a ready connection (state: {})", state)
            }
            RegistrationError::Encode(e) => write!(f, "Failed to encode registration: {}", e),
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Registers the node with the coordinator, retrying until acknowledged
pub struct RegistrationClient<A> {
    api: A,
    retry_delay: Duration,
    attempt_timeout: Duration,
}

impl<A: CoordinatorApi> RegistrationClient<A> {
    pub fn new(api: A, retry_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            api,
            retry_delay,
            attempt_timeout,
        }
    }

    /// Block until the coordinator acknowledges the device.
    ///
    /// Any status other than [`REGISTERED_STATUS`], a transport error, or an
    /// attempt exceeding the timeout is followed by a fixed `retry_delay` and
    /// another attempt. Only an unusable precondition is returned as an error.
    pub async fn register(
        &mut self,
        config: &DeviceConfig,
        status: &ConnectionStatus,
    ) -> Result<RegistrationReport, RegistrationError> {
        let state = status.get();
        if !state.is_ready() {
            return Err(RegistrationError::NotReady(state));
        }

        let request = RegistrationRequest::sensor(&config.device_name);
        let body = serde_json::to_vec(&request).map_err(RegistrationError::Encode)?;
        info!(
            "📡 Registering {} with coordinator {}",
            config.device_name, config.coordinator
        );
        debug!("Registration payload: {}", String::from_utf8_lossy(&body));

        let mut attempt = RegistrationAttempt::default();
        loop {
            attempt.count += 1;

            match with_timeout(
                self.attempt_timeout,
                self.api.put_json(REGISTER_ENDPOINT, &body),
            )
            .await
            {
                Ok(Ok(response)) if response.status_code == REGISTERED_STATUS => {
                    info!(
                        "✅ Registration acknowledged after {} attempt(s)",
                        attempt.count
                    );
                    return Ok(RegistrationReport {
                        attempts: attempt.count,
                    });
                }
                Ok(Ok(response)) => {
                    attempt.last_status = Some(response.status_code);
                    warn!(
                        "⚠️ Registration attempt {} answered {} (expected {})",
                        attempt.count, response.status_code, REGISTERED_STATUS
                    );
                }
                Ok(Err(e)) => {
                    warn!("⚠️ Registration attempt {} failed: {:#}", attempt.count, e);
                }
                Err(_) => {
                    warn!(
                        "⏱️ Registration attempt {} timed out after {}ms",
                        attempt.count,
                        self.attempt_timeout.as_millis()
                    );
                }
            }

            info!(
                "🔄 Retrying registration in {}ms (last status: {:?})",
                self.retry_delay.as_millis(),
                attempt.last_status
            );
            Timer::after(self.retry_delay).await;
        }
    }
}
