//! Interrupt-to-task hand-off for sensor events.
//!
//! [`EventSignal`] is a saturating single-slot flag: any number of raises
//! before the consumer drains the slot collapse into one wake-up.
//!
//! Raising and waking are separate steps. [`raise`](EventSignal::raise) is a
//! single atomic store and is the only call allowed in interrupt context.
//! [`wake`](EventSignal::wake) runs the consumer's waker, which on the std
//! executor takes a mutex, so it must be called from a task or thread.
//! [`signal`](EventSignal::signal) does both for producers that are already
//! in task context.
//!
//! The slot is a level, not an edge, so a signal raised before the consumer
//! first waits is observed by that first wait.

use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;

use futures_util::task::AtomicWaker;

pub struct EventSignal {
    pending: AtomicBool,
    waker: AtomicWaker,
}

impl EventSignal {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    /// Mark an event pending without waking anyone. ISR-safe.
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Wake the consumer task, if one is parked. Task context only.
    pub fn wake(&self) {
        self.waker.wake();
    }

    /// Raise and wake in one call. Task context only.
    pub fn signal(&self) {
        self.raise();
        self.wake();
    }

    /// Consumer side. Resolves once an event is pending and clears the slot.
    ///
    /// Only one task may wait at a time; a second waiter replaces the first.
    pub async fn wait_and_consume(&self) {
        poll_fn(|cx| {
            if self.take() {
                return Poll::Ready(());
            }

            self.waker.register(cx.waker());

            // Re-check after registering so a signal racing the registration is not missed
            if self.take() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Clear the slot without waiting. Returns true if an event was pending.
    pub fn try_consume(&self) -> bool {
        self.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl Default for EventSignal {
    fn default() -> Self {
        Self::new()
    }
}
