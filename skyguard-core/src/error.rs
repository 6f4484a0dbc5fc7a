//! Error types for protocol parsing and command building

use thiserror::Error;

/// Errors that can occur when decoding inbound device traffic
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Packet is too short to contain required data
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Packet header doesn't match expected format
    #[error("Invalid header: expected {expected:02X?}, got {actual:02X?}")]
    InvalidHeader {
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    /// Length field doesn't match actual packet length
    #[error("Length mismatch: header says {header_len} bytes, packet has {actual_len}")]
    LengthMismatch { header_len: usize, actual_len: usize },

    /// Embedded JSON could not be decoded
    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    /// Invalid UTF-8 in a text field or frame
    #[error("Invalid string encoding")]
    InvalidString,

    /// A JSON document carried none of the recognised top-level keys
    #[error("Unrecognised document, keys: {0:?}")]
    UnknownDocument(Vec<String>),

    /// A stream buffer grew past its cap without yielding a document
    #[error("Stream buffer overflow: {len} bytes without a complete document")]
    BufferOverflow { len: usize },

    /// Invalid packet data
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        ParseError::MalformedJson(e.to_string())
    }
}

/// Errors that can occur when building an outbound device command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Relay channel outside the wired range
    #[error("Unsupported relay channel {0} (only 1-7)")]
    UnsupportedChannel(i32),

    /// Payload could not be serialised
    #[error("Encoding failed: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::Encode(e.to_string())
    }
}
