//! Device controllers using IoProvider
//!
//! This module provides platform-independent controllers for the three
//! countermeasure devices. They work against any backend via the
//! [`IoProvider`] trait.
//!
//! # Architecture
//!
//! Each controller handles:
//! - socket setup and, for the relay, TCP connection management
//! - command encoding via the matching [`protocol`](crate::protocol) module
//! - inbound reports and request completions
//!
//! Every command is fire-and-forget: a method encodes, sends and returns. Failures
//! are logged, never returned to the decision path. Controllers queue
//! [`ControllerEvent`]s that the owner drains with `take_events()` after each call.
//!
//! ```rust,ignore
//! use skyguard_core::controllers::{ControllerEvent, RelayController};
//! use skyguard_core::IoProvider;
//!
//! fn main_loop<I: IoProvider>(io: &mut I, relay: &mut RelayController) {
//!     relay.connect(io);
//!     loop {
//!         relay.poll(io);
//!         for event in relay.take_events() {
//!             if let ControllerEvent::RelayLink(up) = event {
//!                 // update UI
//!             }
//!         }
//!         relay.set_all(io, true);
//!     }
//! }
//! ```
//!
//! # Devices
//!
//! | Device | Controller | Transport |
//! |--------|------------|-----------|
//! | GNSS spoofer | [`SpoofController`] | UDP |
//! | Relay bank | [`RelayController`] | TCP |
//! | RF jammer | [`JammerController`] | HTTP |

use crate::events::LogLevel;
use crate::io::{IoProvider, IoProviderExt};
use crate::model::GeoPosition;
use crate::protocol::spoof::SpoofStatus;

pub mod jammer;
pub mod relay;
pub mod spoof;

pub use jammer::JammerController;
pub use relay::RelayController;
pub use spoof::SpoofController;

/// Events emitted by controllers for their owner to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Operator-visible log line; already written to the I/O log
    Log { level: LogLevel, message: String },

    /// Spoofer health changed
    SpoofStatus(SpoofStatus),

    /// The spoofer reported a valid GNSS fix for the station
    SelfPosition(GeoPosition),

    /// Relay TCP link went up or down
    RelayLink(bool),

    /// A jammer request finished
    JammerReply {
        path: String,
        ok: bool,
        status: Option<u16>,
        body: String,
    },
}

/// Pending controller events.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<ControllerEvent>,
}

impl Outbox {
    pub fn push(&mut self, event: ControllerEvent) {
        self.events.push(event);
    }

    /// Log through the provider and queue the same line for the operator.
    pub fn report<I: IoProvider>(&mut self, io: &I, level: LogLevel, message: String) {
        io.log(level, &message);
        self.events.push(ControllerEvent::Log { level, message });
    }

    pub fn take(&mut self) -> Vec<ControllerEvent> {
        std::mem::take(&mut self.events)
    }
}
