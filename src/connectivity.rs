//! Connectivity supervisor.
//!
//! Owns the Wi-Fi link and drives the shared broker session. `start` brings
//! the node up at boot; `poll`, invoked on a fixed cadence by
//! [`ConnectivitySupervisor::run`], checks liveness and makes at most one
//! reconnect attempt per invocation. Only this module writes the
//! [`ConnectionStatus`], and it does so while holding the broker session
//! lock so the publisher always sees state and session agree.

use embassy_time::{with_timeout, Duration, Instant, Ticker, Timer};
use log::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::mqtt_client::{BrokerSession, SharedSession};
use crate::node::FatalError;
use crate::system_state::{ConnectionState, ConnectionStatus};
use crate::wifi_client::WifiLink;

/// What a single `poll` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Wi-Fi and broker session up, nothing attempted
    Healthy,
    /// A reconnect was due but the limiter withheld it
    Throttled,
    /// Wi-Fi re-association attempted and failed
    WifiDown,
    /// Wi-Fi re-associated; the broker is retried on a later poll
    WifiRestored,
    /// Broker session re-established
    Reconnected,
    /// Broker reconnect attempted and failed
    Degraded,
}

/// Minimum spacing between reconnect attempts, independent of poll frequency
#[derive(Debug)]
pub struct ReconnectLimiter {
    min_spacing: Duration,
    last_attempt: Option<Instant>,
}

impl ReconnectLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_attempt: None,
        }
    }

    /// Limiter for a loop ticking every `poll_interval`.
    ///
    /// Spacing is half the interval so ticker jitter never throttles a
    /// regular tick, while back-to-back polls are still held off.
    pub fn for_poll_interval(poll_interval: Duration) -> Self {
        Self::new(poll_interval / 2)
    }

    /// Claim the next attempt slot if the spacing has elapsed
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last_attempt {
            Some(last) if now.saturating_duration_since(last) < self.min_spacing => false,
            _ => {
                self.last_attempt = Some(now);
                true
            }
        }
    }
}

pub struct ConnectivitySupervisor<'a, W, B> {
    config: &'a DeviceConfig,
    wifi: W,
    session: &'a SharedSession<B>,
    status: &'a ConnectionStatus,
    limiter: ReconnectLimiter,
}

impl<'a, W: WifiLink, B: BrokerSession> ConnectivitySupervisor<'a, W, B> {
    pub fn new(
        config: &'a DeviceConfig,
        wifi: W,
        session: &'a SharedSession<B>,
        status: &'a ConnectionStatus,
    ) -> Self {
        Self {
            config,
            wifi,
            session,
            status,
            limiter: ReconnectLimiter::for_poll_interval(config.timing.poll_interval),
        }
    }

    pub fn config(&self) -> &'a DeviceConfig {
        self.config
    }

    pub fn status(&self) -> &'a ConnectionStatus {
        self.status
    }

    /// Bring up Wi-Fi and the broker session.
    ///
    /// Wi-Fi association is retried until it succeeds. The broker is then
    /// retried until the session is up or the connect timeout elapses, in
    /// which case the node is left `Degraded` for `poll` to recover.
    pub async fn start(&mut self) -> Result<(), FatalError> {
        self.config.validate().map_err(FatalError::InvalidConfig)?;
        info!("🚀 Starting connectivity for {}", self.config.device_name);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if self.associate_once().await {
                break;
            }
            warn!(
                "🔄 Wi-Fi association attempt {} failed, retrying in {}ms",
                attempts,
                self.config.timing.wifi_retry_delay.as_millis()
            );
            Timer::after(self.config.timing.wifi_retry_delay).await;
        }

        let deadline = Instant::now() + self.config.timing.connect_timeout;
        loop {
            if self.connect_broker_once().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("⚠️ Broker unreachable at boot, continuing degraded");
                return Ok(());
            }
            Timer::after(self.config.timing.broker_retry_delay).await;
        }
    }

    /// Poll until the node is `Ready`
    pub async fn await_ready(&mut self) {
        while !self.status.is_ready() {
            Timer::after(self.config.timing.poll_interval).await;
            self.poll().await;
        }
    }

    /// Check liveness and make at most one reconnect attempt
    pub async fn poll(&mut self) -> PollOutcome {
        if !self.wifi.is_connected() {
            self.set_state(ConnectionState::Disconnected).await;
            if !self.limiter.try_acquire(Instant::now()) {
                debug!("Wi-Fi down, reconnect withheld by limiter");
                return PollOutcome::Throttled;
            }
            info!("📶 Wi-Fi link lost, attempting re-association");
            return if self.associate_once().await {
                PollOutcome::WifiRestored
            } else {
                PollOutcome::WifiDown
            };
        }

        {
            let session = self.session.lock().await;
            if session.is_alive() {
                // The client may also have recovered on its own
                self.status.set(ConnectionState::Ready);
                return PollOutcome::Healthy;
            }
            // Publisher must stop sending before any reconnect is attempted
            if !matches!(self.status.get(), ConnectionState::Degraded(_)) {
                self.status
                    .set(ConnectionState::Degraded("broker session lost".to_string()));
            }
        }

        if !self.limiter.try_acquire(Instant::now()) {
            debug!("Broker down, reconnect withheld by limiter");
            return PollOutcome::Throttled;
        }

        info!("🔄 Broker session lost, attempting a single reconnect");
        if self.connect_broker_once().await {
            PollOutcome::Reconnected
        } else {
            PollOutcome::Degraded
        }
    }

    /// Fixed-cadence control loop. Never returns.
    pub async fn run(&mut self) {
        info!(
            "⏱️ Connectivity supervisor polling every {}ms",
            self.config.timing.poll_interval.as_millis()
        );
        let mut ticker = Ticker::every(self.config.timing.poll_interval);
        loop {
            ticker.next().await;
            let outcome = self.poll().await;
            debug!("Poll outcome: {:?}", outcome);
        }
    }

    async fn associate_once(&mut self) -> bool {
        self.set_state(ConnectionState::WifiConnecting).await;

        let timeout = self.config.timing.connect_timeout;
        let result = with_timeout(timeout, self.wifi.associate(&self.config.wifi, timeout)).await;

        match result {
            Ok(Ok(ip)) => {
                info!("✅ Wi-Fi up with IP {}", ip);
                self.set_state(ConnectionState::WifiConnected).await;
                true
            }
            Ok(Err(e)) => {
                warn!("❌ Wi-Fi association failed: {:#}", e);
                self.set_state(ConnectionState::Disconnected).await;
                false
            }
            Err(_) => {
                warn!("⏱️ Wi-Fi association timed out");
                self.set_state(ConnectionState::Disconnected).await;
                false
            }
        }
    }

    async fn connect_broker_once(&mut self) -> bool {
        let mut session = self.session.lock().await;
        self.status.set(ConnectionState::BrokerConnecting);

        let timing = &self.config.timing;
        let result = with_timeout(
            timing.connect_timeout,
            session.connect(&self.config.device_name, &self.config.broker, timing.keep_alive),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                info!("✅ Broker session up, node ready");
                self.status.set(ConnectionState::Ready);
                true
            }
            Ok(Err(e)) => {
                error!("❌ Broker connect to {} failed: {:#}", self.config.broker, e);
                self.status.set(ConnectionState::Degraded(e.to_string()));
                false
            }
            Err(_) => {
                error!("⏱️ Broker connect to {} timed out", self.config.broker);
                self.status
                    .set(ConnectionState::Degraded("broker connect timed out".to_string()));
                false
            }
        }
    }

    // State writes happen under the session lock
    async fn set_state(&self, state: ConnectionState) {
        let _session = self.session.lock().await;
        self.status.set(state);
    }
}
