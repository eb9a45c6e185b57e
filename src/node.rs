//! Boot orchestration.
//!
//! Connectivity first, then registration, then the sensor interrupt. No
//! event can be published for a device the coordinator does not know yet.

use std::sync::Arc;

use log::{error, info};

use crate::api::CoordinatorApi;
use crate::config::ConfigError;
use crate::connectivity::ConnectivitySupervisor;
use crate::event_signal::EventSignal;
use crate::mqtt_client::BrokerSession;
use crate::registration::{RegistrationClient, RegistrationReport};
use crate::sensor_input::EventTrigger;
use crate::wifi_client::WifiLink;

const HALT_LOG_INTERVAL_SECS: u64 = 30;

/// Boot failures that leave the node unusable until an external reset
#[derive(Debug)]
pub enum FatalError {
    InvalidConfig(ConfigError),
    Storage(String),
    Peripheral(String),
    Registration(String),
}

impl core::fmt::Display for FatalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FatalError::InvalidConfig(e) => write!(f, "Invalid configuration: {}", e),
            FatalError::Storage(msg) => write!(f, "Storage unavailable: {}", msg),
            FatalError::Peripheral(msg) => write!(f, "Peripheral setup failed: {}", msg),
            FatalError::Registration(msg) => write!(f, "Registration impossible: {}", msg),
        }
    }
}

impl std::error::Error for FatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FatalError::InvalidConfig(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for FatalError {
    fn from(e: ConfigError) -> Self {
        FatalError::InvalidConfig(e)
    }
}

/// Bring the node from power-on to armed.
///
/// Returns once the coordinator has acknowledged the device and the sensor
/// interrupt is enabled. The caller then starts the publisher and the
/// supervisor's control loop.
pub async fn bring_up<W, B, A, T>(
    supervisor: &mut ConnectivitySupervisor<'_, W, B>,
    registration: &mut RegistrationClient<A>,
    trigger: &mut T,
    signal: Arc<EventSignal>,
) -> Result<RegistrationReport, FatalError>
where
    W: WifiLink,
    B: BrokerSession,
    A: CoordinatorApi,
    T: EventTrigger,
{
    supervisor.start().await?;
    supervisor.await_ready().await;

    let report = registration
        .register(supervisor.config(), supervisor.status())
        .await
        .map_err(|e| FatalError::Registration(e.to_string()))?;

    trigger
        .arm(signal)
        .map_err(|e| FatalError::Peripheral(format!("sensor interrupt: {:#}", e)))?;

    info!(
        "✅ Node {} registered and armed after {} registration attempt(s)",
        supervisor.config().device_name,
        report.attempts
    );
    Ok(report)
}

/// Park the boot thread after a fatal error. Recovery requires an external reset.
pub fn halt(err: &FatalError) -> ! {
    loop {
        error!("🛑 Node halted: {}. Reset required.", err);
        std::thread::sleep(std::time::Duration::from_secs(HALT_LOG_INTERVAL_SECS));
    }
}
