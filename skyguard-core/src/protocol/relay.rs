//! Suppression relay bank protocol
//!
//! The relay board speaks Modbus RTU framing over a raw TCP socket (a serial
//! bridge). Only a handful of commands are ever needed, so every frame is a
//! pre-computed literal with its CRC baked in:
//!
//! - single coil write (function 0x05), one per channel and state, 8 bytes
//! - multiple coil write (function 0x0F) covering all 32 coils, 13 bytes
//!
//! The board's replies are echoes and are not interpreted.

use crate::error::CommandError;

// =============================================================================
// Constants
// =============================================================================

/// Default TCP port of the serial bridge
pub const DEFAULT_PORT: u16 = 2000;

/// Number of wired channels
pub const CHANNEL_COUNT: i32 = 7;

/// Write all coils on: `FE 0F 00 00 00 20 04 FF FF FF FF F6 0B`
pub const ALL_ON: [u8; 13] = [
    0xFE, 0x0F, 0x00, 0x00, 0x00, 0x20, 0x04, 0xFF, 0xFF, 0xFF, 0xFF, 0xF6, 0x0B,
];

/// Write all coils off: `FE 0F 00 00 00 20 04 00 00 00 00 F7 9F`
pub const ALL_OFF: [u8; 13] = [
    0xFE, 0x0F, 0x00, 0x00, 0x00, 0x20, 0x04, 0x00, 0x00, 0x00, 0x00, 0xF7, 0x9F,
];

/// Single coil frames, indexed by `channel - 1`, as `(on, off)`
const CHANNEL_FRAMES: [([u8; 8], [u8; 8]); CHANNEL_COUNT as usize] = [
    (
        [0xFE, 0x05, 0x00, 0x00, 0xFF, 0x00, 0x98, 0x35],
        [0xFE, 0x05, 0x00, 0x00, 0x00, 0x00, 0xD9, 0xC5],
    ),
    (
        [0xFE, 0x05, 0x00, 0x01, 0xFF, 0x00, 0xC9, 0xF5],
        [0xFE, 0x05, 0x00, 0x01, 0x00, 0x00, 0x88, 0x05],
    ),
    (
        [0xFE, 0x05, 0x00, 0x02, 0xFF, 0x00, 0x39, 0xF5],
        [0xFE, 0x05, 0x00, 0x02, 0x00, 0x00, 0x78, 0x05],
    ),
    (
        [0xFE, 0x05, 0x00, 0x03, 0xFF, 0x00, 0x68, 0x35],
        [0xFE, 0x05, 0x00, 0x03, 0x00, 0x00, 0x29, 0xC5],
    ),
    (
        [0xFE, 0x05, 0x00, 0x04, 0xFF, 0x00, 0xD9, 0xF4],
        [0xFE, 0x05, 0x00, 0x04, 0x00, 0x00, 0x98, 0x04],
    ),
    (
        [0xFE, 0x05, 0x00, 0x05, 0xFF, 0x00, 0x88, 0x34],
        [0xFE, 0x05, 0x00, 0x05, 0x00, 0x00, 0xC9, 0xC4],
    ),
    (
        [0xFE, 0x05, 0x00, 0x06, 0xFF, 0x00, 0x78, 0x34],
        [0xFE, 0x05, 0x00, 0x06, 0x00, 0x00, 0x39, 0xC4],
    ),
];

// =============================================================================
// Command Lookup
// =============================================================================

/// What a relay frame does, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayTarget {
    Channel(i32),
    All,
}

impl std::fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayTarget::Channel(ch) => write!(f, "channel {}", ch),
            RelayTarget::All => write!(f, "all channels"),
        }
    }
}

/// Frame switching one channel (1-7).
pub fn frame_for_channel(channel: i32, on: bool) -> Result<&'static [u8], CommandError> {
    if !(1..=CHANNEL_COUNT).contains(&channel) {
        return Err(CommandError::UnsupportedChannel(channel));
    }
    let (on_frame, off_frame) = &CHANNEL_FRAMES[(channel - 1) as usize];
    Ok(if on { on_frame } else { off_frame })
}

/// Frame switching every channel at once.
pub fn frame_for_all(on: bool) -> &'static [u8] {
    if on {
        &ALL_ON
    } else {
        &ALL_OFF
    }
}

/// Upper-case hex without separators, as the frames appear in the board manual.
pub fn to_hex(frame: &[u8]) -> String {
    frame.iter().map(|b| format!("{:02X}", b)).collect()
}
