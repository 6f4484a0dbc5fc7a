//! Detection ingestion state machines.
//!
//! Two sensor deployments exist and a station runs exactly one of them:
//!
//! | Variant | Transport | State machine |
//! |---------|-----------|---------------|
//! | TCP server | sensor connects in, binary-wrapped JSON | [`DetectionStream`] |
//! | Socket.IO | we connect out, WebSocket text frames | [`SocketIoSession`] |
//!
//! Both turn their input into [`DetectionEvent`]s for the aggregator. Neither
//! owns a socket: the shell feeds bytes/frames in and performs the connects and
//! sends they ask for.

use crate::model::{DroneTarget, GeoPosition, ImageSignal};

pub mod cache;
pub mod session;
pub mod stream;

pub use cache::TtlCache;
pub use session::{SessionOutput, SocketIoSession};
pub use stream::DetectionStream;

/// Data-silence watchdog default
pub const DEFAULT_WATCHDOG_MS: u64 = 3000;
/// Lifetime of a cached target in the TCP variant
pub const DEFAULT_TARGET_TTL_MS: u64 = 4000;
/// Delay before reopening a closed Socket.IO link
pub const DEFAULT_RECONNECT_MS: u64 = 5000;

/// Why downstream detection state was wiped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    /// No data within the watchdog period; the link may still be up
    DataTimeout,
    /// The sensor connection closed
    LinkLost,
}

impl std::fmt::Display for ClearReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClearReason::DataTimeout => write!(f, "data timeout"),
            ClearReason::LinkLost => write!(f, "link lost"),
        }
    }
}

/// Typed output of the detection channel.
///
/// List variants are complete replacements, never deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
    Drones(Vec<DroneTarget>),
    Images(Vec<ImageSignal>),
    /// Both lists at once
    Batch {
        drones: Vec<DroneTarget>,
        images: Vec<ImageSignal>,
    },
    StationPosition(GeoPosition),
    /// Empty both lists
    Cleared(ClearReason),
}
