use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use log::info;

// Connectivity state of the node
// Mutated only by the connectivity supervisor; read by the publisher and the
// registration client to gate their actions
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,     // No Wi-Fi association
    WifiConnecting,   // Wi-Fi association in progress
    WifiConnected,    // Associated, broker session not yet attempted
    BrokerConnecting, // Broker session being established
    Ready,            // Wi-Fi and broker session up
    Degraded(String), // Wi-Fi up, broker session down (reason)
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl core::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::WifiConnecting => write!(f, "wifi-connecting"),
            ConnectionState::WifiConnected => write!(f, "wifi-connected"),
            ConnectionState::BrokerConnecting => write!(f, "broker-connecting"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Degraded(reason) => write!(f, "degraded ({})", reason),
        }
    }
}

/// The single process-wide connection state cell.
///
/// Built once at boot and handed by reference to every component; reads and
/// writes are short critical sections and never happen in interrupt context.
pub struct ConnectionStatus {
    state: Mutex<CriticalSectionRawMutex, RefCell<ConnectionState>>,
}

impl ConnectionStatus {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(ConnectionState::Disconnected)),
        }
    }

    /// Snapshot of the current state
    pub fn get(&self) -> ConnectionState {
        self.state.lock(|state| state.borrow().clone())
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock(|state| state.borrow().is_ready())
    }

    /// Record a transition, logging it once. Returns true if the state changed.
    pub(crate) fn set(&self, next: ConnectionState) -> bool {
        let previous = self.state.lock(|state| state.replace(next.clone()));
        if previous == next {
            return false;
        }

        info!("🔀 Connection state: {} → {}", previous, next);
        true
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}
