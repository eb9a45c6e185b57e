// Sensor input
// Rising-edge interrupt on the sensor pin feeding the EventSignal. The ISR
// callback only raises the signal and notifies a relay task, which performs
// the executor wake-up. The interrupt is one-shot on ESP-IDF and is
// re-enabled from task context after each consumed event.

use std::sync::Arc;

use crate::event_signal::EventSignal;

/// Hardware trigger that raises an [`EventSignal`] on each sensor edge
pub trait EventTrigger {
    /// Install the interrupt handler and enable it. Called once, after registration.
    fn arm(&mut self, signal: Arc<EventSignal>) -> anyhow::Result<()>;

    /// Re-enable the interrupt after the consumer has drained the signal
    fn rearm(&mut self) -> anyhow::Result<()>;
}

#[cfg(target_os = "espidf")]
pub use esp::GpioTrigger;

#[cfg(target_os = "espidf")]
mod esp {
    use std::num::NonZeroU32;
    use std::sync::mpsc;
    use std::sync::Arc;

    use anyhow::anyhow;
    use esp_idf_svc::hal::delay::BLOCK;
    use esp_idf_svc::hal::gpio::{AnyIOPin, Input, InterruptType, Pin, PinDriver, Pull};
    use esp_idf_svc::hal::task::notification::{Notification, Notifier};
    use log::{debug, info};

    use super::EventTrigger;
    use crate::event_signal::EventSignal;

    const RELAY_STACK_SIZE: usize = 4 * 1024;

    /// Sensor line on a GPIO, idle low, active high
    pub struct GpioTrigger {
        pin: PinDriver<'static, AnyIOPin, Input>,
        subscribed: bool,
    }

    impl GpioTrigger {
        pub fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
            let pin_number = pin.pin();
            let mut pin = PinDriver::input(pin)?;
            pin.set_pull(Pull::Down)?;
            pin.set_interrupt_type(InterruptType::PosEdge)?;

            info!("✅ Sensor input configured on GPIO{}", pin_number);
            Ok(Self {
                pin,
                subscribed: false,
            })
        }

        // FreeRTOS task that turns ISR notifications into executor wake-ups.
        // The executor's waker takes a mutex, which is not allowed in an ISR.
        fn spawn_relay(signal: Arc<EventSignal>) -> anyhow::Result<Arc<Notifier>> {
            let (tx, rx) = mpsc::channel();

            std::thread::Builder::new()
                .name("sensor-relay".into())
                .stack_size(RELAY_STACK_SIZE)
                .spawn(move || {
                    // The notification is bound to the task that creates it
                    let notification = Notification::new();
                    if tx.send(notification.notifier()).is_err() {
                        return;
                    }
                    loop {
                        if notification.wait(BLOCK).is_some() {
                            signal.wake();
                        }
                    }
                })?;

            rx.recv()
                .map_err(|_| anyhow!("Sensor relay task exited during startup"))
        }
    }

    impl EventTrigger for GpioTrigger {
        fn arm(&mut self, signal: Arc<EventSignal>) -> anyhow::Result<()> {
            if self.subscribed {
                return Err(anyhow!("Sensor interrupt already armed"));
            }

            let notifier = Self::spawn_relay(signal.clone())?;

            // SAFETY: the callback runs in ISR context; it does one atomic
            // store and a FreeRTOS notify-from-ISR, nothing that can block
            unsafe {
                self.pin.subscribe(move || {
                    signal.raise();
                    #[allow(unused_unsafe)]
                    unsafe {
                        notifier.notify_and_yield(NonZeroU32::MIN);
                    }
                })?;
            }
            self.subscribed = true;
            self.pin.enable_interrupt()?;

            info!("🎯 Sensor interrupt armed");
            Ok(())
        }

        fn rearm(&mut self) -> anyhow::Result<()> {
            self.pin.enable_interrupt()?;
            debug!("Sensor interrupt re-enabled");
            Ok(())
        }
    }
}
