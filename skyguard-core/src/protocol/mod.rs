//! Device protocol implementations.
//!
//! This module contains wire protocol encoding and decoding for each device the
//! station talks to. All functions are pure (no I/O).
//!
//! # Structure
//!
//! - [`spoof`] - GNSS spoofer, `FF`-framed JSON over UDP
//! - [`relay`] - suppression relay bank, fixed Modbus frames over TCP
//! - [`jammer`] - RF jammer, JSON over HTTP POST
//! - [`detection`] - detection sensor, JSON documents embedded in a TCP stream
//! - [`socketio`] - detection sensor, Socket.IO text frames over a WebSocket
//!
//! # Example
//!
//! ```rust,no_run
//! use skyguard_core::protocol::{relay, spoof};
//!
//! let packet = spoof::create_switch_command("a57502fcdc4e7412", true).unwrap();
//! assert!(packet.starts_with(b"FF0039602"));
//!
//! let frame = relay::frame_for_channel(3, true).unwrap();
//! assert_eq!(frame.len(), 8);
//! ```

use serde_json::Value;

pub mod detection;
pub mod jammer;
pub mod relay;
pub mod socketio;
pub mod spoof;

/// Read a number that sensors send either as a JSON number or as a string.
///
/// Missing fields, `"--"` placeholders and anything unparsable read as `0.0`.
pub fn lenient_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Read a text field that may arrive as a string or a number.
pub fn lenient_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Read a flag sent as a boolean, a 0/1 number or a `"true"` string.
pub fn lenient_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}
