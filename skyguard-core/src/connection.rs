//! Connection state machine for device links.
//!
//! Pure state transitions with no I/O. The relay controller drives one of these
//! for its TCP link and the Socket.IO session drives one for the detection
//! WebSocket; the shell performs the actual connects and reports back.
//!
//! ```text
//!  Disconnected ──start_connecting──▶ Connecting ──connected──▶ Connected
//!       ▲                                 │                        │
//!       │                               error                data_received
//!       │                                 ▼                        ▼
//!       └────────disconnected──────────  Error ◀──────error────── Active
//! ```
//!
//! There is no backoff: reconnect policy belongs to the owner (one attempt per
//! failed relay send, a fixed delay for the detection link).

use serde::{Deserialize, Serialize};

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of a TCP or WebSocket link to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected, no connection attempt in progress
    #[default]
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected but nothing received yet
    Connected,
    /// Connected and receiving data
    Active,
    /// Connection attempt failed or link dropped
    Error,
    /// Shutting down, no more connection attempts
    ShuttingDown,
}

impl ConnectionState {
    /// Check if the link is usable for sending
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Active)
    }

    pub fn is_connecting(&self) -> bool {
        *self == ConnectionState::Connecting
    }

    /// Check if we may start a new attempt
    pub fn should_reconnect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Active => write!(f, "Active"),
            ConnectionState::Error => write!(f, "Error"),
            ConnectionState::ShuttingDown => write!(f, "Shutting Down"),
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Tracks link state and timing.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    state: ConnectionState,
    /// Number of consecutive failed attempts
    failure_count: u32,
    last_state_change_ms: u64,
    last_data_ms: Option<u64>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn can_send(&self) -> bool {
        self.state.can_send()
    }

    pub fn is_connecting(&self) -> bool {
        self.state.is_connecting()
    }

    pub fn should_reconnect(&self) -> bool {
        self.state.should_reconnect()
    }

    pub fn time_in_state_ms(&self, current_time_ms: u64) -> u64 {
        current_time_ms.saturating_sub(self.last_state_change_ms)
    }

    /// Time since the last received data, `None` if nothing arrived on this link.
    pub fn time_since_data_ms(&self, current_time_ms: u64) -> Option<u64> {
        self.last_data_ms
            .map(|t| current_time_ms.saturating_sub(t))
    }

    // -------------------------------------------------------------------------
    // State Transitions
    // -------------------------------------------------------------------------

    pub fn start_connecting(&mut self, current_time_ms: u64) {
        if self.state != ConnectionState::ShuttingDown {
            self.set_state(ConnectionState::Connecting, current_time_ms);
        }
    }

    pub fn connected(&mut self, current_time_ms: u64) {
        if self.state.is_connecting() {
            self.set_state(ConnectionState::Connected, current_time_ms);
            self.failure_count = 0;
            self.last_data_ms = None;
        }
    }

    /// Record inbound data, promoting Connected to Active.
    pub fn data_received(&mut self, current_time_ms: u64) {
        if self.state == ConnectionState::Connected {
            self.set_state(ConnectionState::Active, current_time_ms);
        }
        if self.state == ConnectionState::Active {
            self.last_data_ms = Some(current_time_ms);
        }
    }

    pub fn error(&mut self, current_time_ms: u64) {
        if self.state != ConnectionState::ShuttingDown {
            self.set_state(ConnectionState::Error, current_time_ms);
            self.failure_count = self.failure_count.saturating_add(1);
        }
    }

    /// Orderly close by either side.
    pub fn disconnected(&mut self, current_time_ms: u64) {
        if self.state != ConnectionState::ShuttingDown {
            self.set_state(ConnectionState::Disconnected, current_time_ms);
        }
    }

    /// No further connection attempts after this.
    pub fn shutdown(&mut self, current_time_ms: u64) {
        self.set_state(ConnectionState::ShuttingDown, current_time_ms);
    }

    fn set_state(&mut self, new_state: ConnectionState, current_time_ms: u64) {
        if self.state != new_state {
            self.state = new_state;
            self.last_state_change_ms = current_time_ms;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
