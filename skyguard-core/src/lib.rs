//! # SkyGuard Core
//!
//! Platform-independent protocol and decision library for a counter-UAV station.
//!
//! This crate contains pure parsing, encoding and decision logic with **zero I/O
//! dependencies**. Every socket and HTTP request goes through the [`IoProvider`]
//! trait, so the same engine runs under tokio in `skyguard-server` and under
//! [`MockIo`](io) in unit tests.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  skyguard-core (platform-independent, no tokio/async deps)  │
//! │  ├── protocol/    (spoof UDP, relay frames, jammer JSON,    │
//! │  │                 detection JSON, Socket.IO)               │
//! │  ├── detection/   (stream + session state machines)         │
//! │  ├── aggregator   (threat snapshot)                         │
//! │  ├── controllers/ (spoof, relay, jammer)                    │
//! │  ├── engine/      (DecisionEngine)                          │
//! │  └── IoProvider   (abstracts UDP/TCP/HTTP I/O)              │
//! └─────────────────────────────────────────────────────────────┘
//!                             ▲
//!                ┌────────────┴────────────┐
//!                │  skyguard-server        │
//!                │  (TokioIoProvider)      │
//!                └─────────────────────────┘
//! ```
//!
//! ## Devices
//!
//! | Device         | Transport          | Controller                |
//! |----------------|--------------------|---------------------------|
//! | GNSS spoofer   | UDP 9099 / 9098    | [`SpoofController`]       |
//! | Relay bank     | TCP 2000 (Modbus)  | [`RelayController`]       |
//! | RF jammer      | HTTP POST 8090     | [`JammerController`]      |
//! | Detection unit | TCP 8089 or WS     | [`DetectionStream`] / [`SocketIoSession`] |
//!
//! ## Key Modules
//!
//! - [`protocol`] - Wire formats for every device
//! - [`detection`] - Sensor ingest, target caching and the silence watchdog
//! - [`aggregator`] - Threat presence and nearest distance
//! - [`engine`] - Auto/Manual decision loop
//! - [`connection`] - Connection state machine
//!
//! ## Example: Encoding a Spoofer Command
//!
//! ```rust
//! use skyguard_core::protocol::spoof;
//!
//! let packet = spoof::create_switch_command("station-key", true).unwrap();
//! assert!(packet.starts_with(b"FF"));
//! assert_eq!(&packet[6..9], b"602");
//! ```
//!
//! ## Example: Using Connection State Machine
//!
//! ```rust
//! use skyguard_core::{ConnectionManager, ConnectionState};
//!
//! let mut conn = ConnectionManager::new();
//! assert_eq!(conn.state(), ConnectionState::Disconnected);
//!
//! conn.start_connecting(0);
//! assert!(conn.is_connecting());
//!
//! conn.connected(100);
//! assert!(conn.can_send());
//! ```

pub mod aggregator;
pub mod config;
pub mod connection;
pub mod controllers;
pub mod detection;
pub mod engine;
pub mod error;
pub mod events;
pub mod io;
pub mod model;
pub mod protocol;
pub mod timer;

// Re-export commonly used types
pub use aggregator::ThreatAggregator;
pub use config::{DetectionMode, StationConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use controllers::{ControllerEvent, JammerController, RelayController, SpoofController};
pub use detection::{ClearReason, DetectionEvent, DetectionStream, SocketIoSession};
pub use engine::{DecisionEngine, DecisionState, DefenseStage};
pub use error::{CommandError, ParseError};
pub use events::{LogLevel, SpoofAction, StationCommand, StationEvent};
pub use io::{
    ConnectProgress, HttpCompletion, HttpRequestHandle, IoError, IoProvider, IoProviderExt,
    TcpSocketHandle, UdpSocketHandle,
};
pub use model::{
    DroneTarget, GeoPosition, ImageSignal, JammerConfig, SignalKind, SpoofDirection, SystemMode,
    ThreatSnapshot,
};
