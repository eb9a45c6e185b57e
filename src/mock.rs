//! In-memory stand-ins for the hardware seams, used by the unit tests

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use embassy_time::{Duration, Instant};

use crate::api::{CoordinatorApi, ResponseData};
use crate::config::{DeviceConfig, Endpoint, NodeTiming, WifiCredentials};
use crate::event_signal::EventSignal;
use crate::mqtt_client::BrokerSession;
use crate::publisher::Clock;
use crate::sensor_input::EventTrigger;
use crate::wifi_client::WifiLink;

pub fn sample_config() -> DeviceConfig {
    DeviceConfig {
        device_name: "sensor1".to_string(),
        wifi: WifiCredentials {
            ssid: "workshop".to_string(),
            passphrase: "hunter22".to_string(),
        },
        broker: Endpoint {
            host: "10.0.0.5".to_string(),
            port: 1883,
        },
        coordinator: Endpoint {
            host: "10.0.0.5".to_string(),
            port: 3030,
        },
        timing: NodeTiming::default(),
    }
}

pub fn sample_config_with(tune: impl FnOnce(&mut NodeTiming)) -> DeviceConfig {
    let mut config = sample_config();
    tune(&mut config.timing);
    config
}

/// Shared counter readable after the mock has been moved into its owner
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicU32>);

impl Counter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared boolean the test can flip from outside
#[derive(Clone, Default)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }
}

pub struct MockWifi {
    script: VecDeque<bool>,
    fallback: bool,
    connected: Flag,
    attempts: Counter,
}

impl MockWifi {
    /// Every association attempt ends with `outcome`
    pub fn always(outcome: bool) -> Self {
        Self::scripted(&[outcome])
    }

    /// Association outcomes in order; the last one repeats
    pub fn scripted(outcomes: &[bool]) -> Self {
        Self {
            script: outcomes.iter().copied().collect(),
            fallback: outcomes.last().copied().unwrap_or(true),
            connected: Flag::default(),
            attempts: Counter::default(),
        }
    }

    /// Handle on the link flag reported by `is_connected`
    pub fn link(&self) -> Flag {
        self.connected.clone()
    }

    pub fn attempts(&self) -> Counter {
        self.attempts.clone()
    }
}

impl WifiLink for MockWifi {
    async fn associate(
        &mut self,
        _credentials: &WifiCredentials,
        _timeout: Duration,
    ) -> anyhow::Result<Ipv4Addr> {
        self.attempts.bump();
        let outcome = self.script.pop_front().unwrap_or(self.fallback);
        self.connected.set(outcome);
        if outcome {
            Ok(Ipv4Addr::new(10, 0, 0, 42))
        } else {
            Err(anyhow!("association rejected"))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }
}

pub type Published = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// Ordered record of calls across several mocks
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub struct MockBroker {
    script: VecDeque<bool>,
    fallback: bool,
    alive: bool,
    connects: u32,
    fail_publish: bool,
    published: Published,
    log: Option<CallLog>,
}

impl MockBroker {
    pub fn accepting() -> Self {
        Self::scripted(&[true])
    }

    pub fn refusing() -> Self {
        Self::scripted(&[false])
    }

    /// Connect outcomes in order; the last one repeats
    pub fn scripted(outcomes: &[bool]) -> Self {
        Self {
            script: outcomes.iter().copied().collect(),
            fallback: outcomes.last().copied().unwrap_or(true),
            alive: false,
            connects: 0,
            fail_publish: false,
            published: Arc::default(),
            log: None,
        }
    }

    /// Session up from the start, as after a successful boot
    pub fn connected() -> Self {
        let mut broker = Self::accepting();
        broker.alive = true;
        broker
    }

    /// Session accepted but every publish call errors
    pub fn failing_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    /// Append "publish" to `log` on every successful publish
    pub fn logging_to(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Drop the session; later connects end with `accept_reconnect`
    pub fn go_down(&mut self, accept_reconnect: bool) {
        self.alive = false;
        self.script.clear();
        self.fallback = accept_reconnect;
    }

    pub fn connects(&self) -> u32 {
        self.connects
    }

    pub fn published(&self) -> Published {
        self.published.clone()
    }
}

impl BrokerSession for MockBroker {
    async fn connect(
        &mut self,
        _client_id: &str,
        _broker: &Endpoint,
        _keep_alive: Duration,
    ) -> anyhow::Result<()> {
        self.connects += 1;
        self.alive = self.script.pop_front().unwrap_or(self.fallback);
        if self.alive {
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        if self.fail_publish {
            return Err(anyhow!("outbox full"));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
        if let Some(log) = &self.log {
            log.lock().unwrap().push("publish");
        }
        Ok(())
    }
}

/// One request seen by [`MockCoordinator`]
#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: String,
    pub body: Vec<u8>,
    pub at: Instant,
}

pub struct MockCoordinator {
    statuses: VecDeque<u16>,
    fallback: u16,
    hanging: u32,
    failing: u32,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockCoordinator {
    /// Response statuses in order; the last one repeats
    pub fn with_statuses(statuses: &[u16]) -> Self {
        Self {
            statuses: statuses.iter().copied().collect(),
            fallback: statuses.last().copied().unwrap_or(204),
            hanging: 0,
            failing: 0,
            calls: Arc::default(),
        }
    }

    /// The first `n` requests never complete
    pub fn hanging_first(mut self, n: u32) -> Self {
        self.hanging = n;
        self
    }

    /// After any hanging requests, the next `n` fail at the transport level
    pub fn failing_first(mut self, n: u32) -> Self {
        self.failing = n;
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        self.calls.clone()
    }
}

impl CoordinatorApi for MockCoordinator {
    async fn put_json(&mut self, endpoint: &str, body: &[u8]) -> anyhow::Result<ResponseData> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                endpoint: endpoint.to_string(),
                body: body.to_vec(),
                at: Instant::now(),
            });
            calls.len() as u32 - 1
        };

        if index < self.hanging {
            core::future::pending::<()>().await;
        }
        if index < self.hanging + self.failing {
            return Err(anyhow!("connection reset by peer"));
        }

        let status_code = self.statuses.pop_front().unwrap_or(self.fallback);
        Ok(ResponseData {
            status_code,
            body: String::new(),
        })
    }
}

/// Records arm/rearm calls and keeps the signal so tests can fire it
#[derive(Clone, Default)]
pub struct FakeTrigger {
    signal: Arc<Mutex<Option<Arc<EventSignal>>>>,
    pub armed: Counter,
    pub rearmed: Counter,
    pub log: CallLog,
}

impl FakeTrigger {
    /// Simulate the rising edge: the ISR raises, the relay task wakes
    pub fn fire(&self) {
        if let Some(signal) = self.signal.lock().unwrap().as_ref() {
            signal.raise();
            signal.wake();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.get() > 0
    }
}

impl EventTrigger for FakeTrigger {
    fn arm(&mut self, signal: Arc<EventSignal>) -> anyhow::Result<()> {
        *self.signal.lock().unwrap() = Some(signal);
        self.armed.bump();
        self.log.lock().unwrap().push("arm");
        Ok(())
    }

    fn rearm(&mut self) -> anyhow::Result<()> {
        self.rearmed.bump();
        self.log.lock().unwrap().push("rearm");
        Ok(())
    }
}

pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.0
    }
}
