//! Event publisher task.
//!
//! Waits on the [`EventSignal`], and for each wake-up publishes one
//! timestamped message on `sensor/<device name>` if the node is `Ready`.
//! Any other state drops the event with a warning. Nothing is queued or
//! retried.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::event_signal::EventSignal;
use crate::mqtt_client::{BrokerSession, OutgoingMessage, SharedSession};
use crate::sensor_input::EventTrigger;
use crate::system_state::{ConnectionState, ConnectionStatus};

/// Source of the wall-clock timestamp carried by each event
pub trait Clock {
    fn now_epoch_seconds(&self) -> u64;
}

/// System wall clock (SNTP-synchronised on the device)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        // Before the first sync the clock may read pre-epoch
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Result of handling one wake-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(OutgoingMessage),
    /// Node was not `Ready`; the event is gone
    Dropped(ConnectionState),
    /// Publish call errored; not retried
    Failed(String),
}

pub struct EventPublisher<'a, B, T, C> {
    device_name: &'a str,
    session: &'a SharedSession<B>,
    status: &'a ConnectionStatus,
    signal: Arc<EventSignal>,
    trigger: T,
    clock: C,
    published: u32,
    dropped: u32,
}

impl<'a, B, T, C> EventPublisher<'a, B, T, C>
where
    B: BrokerSession,
    T: EventTrigger,
    C: Clock,
{
    pub fn new(
        device_name: &'a str,
        session: &'a SharedSession<B>,
        status: &'a ConnectionStatus,
        signal: Arc<EventSignal>,
        trigger: T,
        clock: C,
    ) -> Self {
        Self {
            device_name,
            session,
            status,
            signal,
            trigger,
            clock,
            published: 0,
            dropped: 0,
        }
    }

    /// Wait for the next wake-up and handle it
    pub async fn process_next(&mut self) -> PublishOutcome {
        self.signal.wait_and_consume().await;

        // The edge interrupt is one-shot; re-enable before touching the network
        if let Err(e) = self.trigger.rearm() {
            error!("❌ Failed to re-enable sensor interrupt: {:#}", e);
        }

        let mut session = self.session.lock().await;
        let state = self.status.get();
        if !state.is_ready() {
            self.dropped += 1;
            warn!(
                "⚠️ Sensor event dropped, connection {} ({} dropped so far)",
                state, self.dropped
            );
            return PublishOutcome::Dropped(state);
        }

        let timestamp = self.clock.now_epoch_seconds();
        let message = match OutgoingMessage::sensor_event(self.device_name, timestamp) {
            Ok(message) => message,
            Err(e) => {
                error!("❌ Failed to encode sensor event: {:#}", e);
                return PublishOutcome::Failed(e.to_string());
            }
        };

        match session.publish(&message.topic, &message.payload) {
            Ok(()) => {
                self.published += 1;
                info!(
                    "📤 Sensor event #{} published to {} (time {})",
                    self.published, message.topic, message.timestamp_epoch_seconds
                );
                PublishOutcome::Published(message)
            }
            Err(e) => {
                error!("❌ Failed to publish sensor event: {:#}", e);
                PublishOutcome::Failed(e.to_string())
            }
        }
    }

    /// Publisher task body. Never returns.
    pub async fn run(&mut self) {
        info!("🎯 Event publisher waiting for sensor events");
        loop {
            let outcome = self.process_next().await;
            debug!("Publish outcome: {:?}", outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeTrigger, FixedClock, MockBroker};
    use embassy_time::{with_timeout, Duration};

    const NOW: u64 = 1_700_000_123;

    fn status_in(state: ConnectionState) -> ConnectionStatus {
        let status = ConnectionStatus::new();
        status.set(state);
        status
    }

    fn armed_trigger(signal: &Arc<EventSignal>) -> FakeTrigger {
        let mut trigger = FakeTrigger::default();
        trigger.arm(signal.clone()).unwrap();
        trigger
    }

    #[tokio::test]
    async fn test_burst_of_signals_publishes_once() {
        let broker = MockBroker::connected();
        let published = broker.published();
        let session = SharedSession::new(broker);
        let status = status_in(ConnectionState::Ready);
        let signal = Arc::new(EventSignal::new());
        let trigger = armed_trigger(&signal);

        for _ in 0..3 {
            trigger.fire();
        }

        let mut publisher = EventPublisher::new(
            "sensor1",
            &session,
            &status,
            signal.clone(),
            trigger.clone(),
            FixedClock(NOW),
        );

        let outcome = publisher.process_next().await;
        assert!(matches!(outcome, PublishOutcome::Published(_)));

        {
            let published = published.lock().unwrap();
            assert_eq!(published.len(), 1);
            assert_eq!(published[0].0, "sensor/sensor1");
            let body: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
            assert_eq!(body["time"], NOW);
        }

        // Coalesced: no second wake-up is pending
        assert!(!signal.is_pending());
        let next = with_timeout(Duration::from_millis(50), publisher.process_next()).await;
        assert!(next.is_err());
        assert_eq!(published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drops_event_while_degraded_and_keeps_waiting() {
        let broker = MockBroker::connected();
        let published = broker.published();
        let session = SharedSession::new(broker);
        let status = status_in(ConnectionState::Degraded("broker down".to_string()));
        let signal = Arc::new(EventSignal::new());
        let trigger = armed_trigger(&signal);

        let mut publisher = EventPublisher::new(
            "sensor1",
            &session,
            &status,
            signal.clone(),
            trigger.clone(),
            FixedClock(NOW),
        );

        trigger.fire();
        let outcome = publisher.process_next().await;
        assert_eq!(
            outcome,
            PublishOutcome::Dropped(ConnectionState::Degraded("broker down".to_string()))
        );
        assert!(published.lock().unwrap().is_empty());

        // Still usable once the supervisor restores the session
        status.set(ConnectionState::Ready);
        trigger.fire();
        let outcome = publisher.process_next().await;
        assert!(matches!(outcome, PublishOutcome::Published(_)));
        assert_eq!(published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_never_publishes_unless_ready() {
        let states = [
            ConnectionState::Disconnected,
            ConnectionState::WifiConnecting,
            ConnectionState::WifiConnected,
            ConnectionState::BrokerConnecting,
            ConnectionState::Degraded("timeout".to_string()),
        ];

        for state in states {
            let broker = MockBroker::connected();
            let published = broker.published();
            let session = SharedSession::new(broker);
            let status = status_in(state.clone());
            let signal = Arc::new(EventSignal::new());
            let trigger = armed_trigger(&signal);
            let mut publisher = EventPublisher::new(
                "sensor1",
                &session,
                &status,
                signal,
                trigger.clone(),
                FixedClock(NOW),
            );

            trigger.fire();
            assert_eq!(publisher.process_next().await, PublishOutcome::Dropped(state));
            assert!(published.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_rearms_before_publishing() {
        let signal = Arc::new(EventSignal::new());
        let trigger = armed_trigger(&signal);
        let session = SharedSession::new(MockBroker::connected().logging_to(trigger.log.clone()));
        let status = status_in(ConnectionState::Ready);
        let mut publisher = EventPublisher::new(
            "sensor1",
            &session,
            &status,
            signal,
            trigger.clone(),
            FixedClock(NOW),
        );

        trigger.fire();
        publisher.process_next().await;
        trigger.fire();
        publisher.process_next().await;

        assert_eq!(trigger.rearmed.get(), 2);
        assert_eq!(
            *trigger.log.lock().unwrap(),
            vec!["arm", "rearm", "publish", "rearm", "publish"]
        );
    }

    #[tokio::test]
    async fn test_publish_error_is_reported_not_retried() {
        let broker = MockBroker::connected().failing_publish();
        let session = SharedSession::new(broker);
        let status = status_in(ConnectionState::Ready);
        let signal = Arc::new(EventSignal::new());
        let trigger = armed_trigger(&signal);
        let mut publisher = EventPublisher::new(
            "sensor1",
            &session,
            &status,
            signal.clone(),
            trigger.clone(),
            FixedClock(NOW),
        );

        trigger.fire();
        assert!(matches!(
            publisher.process_next().await,
            PublishOutcome::Failed(_)
        ));
        assert!(!signal.is_pending());
        assert!(status.is_ready());
    }

    #[test]
    fn test_system_clock_is_past_epoch() {
        assert!(SystemClock.now_epoch_seconds() > 1_600_000_000);
    }
}
