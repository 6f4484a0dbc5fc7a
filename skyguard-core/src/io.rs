//! I/O abstraction for platform-independent station code.
//!
//! This module defines the trait that abstracts socket and HTTP operations, so the
//! controllers and the decision engine run unchanged on the tokio shell and inside
//! unit tests with a recording mock.
//!
//! # Design
//!
//! The trait uses a **poll-based** interface (not async):
//! - the decision loop is single-threaded and must never block
//! - TCP connects and HTTP requests are started and later polled for completion
//! - native code adapts tokio with `try_recv`/`try_send` and background tasks
//!
//! # Example
//!
//! ```rust,ignore
//! use skyguard_core::io::IoProvider;
//! use std::net::{Ipv4Addr, SocketAddrV4};
//!
//! fn listen_for_reports<I: IoProvider>(io: &mut I) {
//!     let socket = io.udp_create().unwrap();
//!     io.udp_bind(&socket, 9098).unwrap();
//!
//!     let mut buf = [0u8; 2048];
//!     while let Some((len, from)) = io.udp_recv_from(&socket, &mut buf) {
//!         io.debug(&format!("{} bytes from {}", len, from));
//!     }
//! }
//! ```

use core::fmt;
use std::net::SocketAddrV4;

use crate::events::LogLevel;

#[cfg(test)]
pub(crate) mod mock;

// =============================================================================
// Error Types
// =============================================================================

/// I/O error type for socket and HTTP operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoError {
    /// Error code (negative values indicate errors, specific meaning varies by platform)
    pub code: i32,
    /// Human-readable error message
    pub message: String,
}

impl IoError {
    /// Create a new I/O error with a code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error from just a code (message will be generic).
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            message: format!("I/O error: {}", code),
        }
    }

    /// Create a "would block" error (no data available, non-blocking).
    pub fn would_block() -> Self {
        Self::new(-11, "Operation would block")
    }

    /// Create a "not connected" error.
    pub fn not_connected() -> Self {
        Self::new(-1, "Not connected")
    }

    /// Create an "invalid handle" error.
    pub fn invalid_handle() -> Self {
        Self::new(-9, "Invalid socket handle")
    }

    /// Check if this is a "would block" error.
    pub fn is_would_block(&self) -> bool {
        self.code == -11
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

// =============================================================================
// Handle Types
// =============================================================================

/// Opaque handle to a UDP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpSocketHandle(pub i32);

/// Opaque handle to a TCP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpSocketHandle(pub i32);

/// Opaque handle to an in-flight HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HttpRequestHandle(pub i32);

/// Progress of a non-blocking TCP connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectProgress {
    /// Still in flight
    Pending,
    /// Connection established
    Connected,
    /// Connection attempt failed; the socket is no longer valid
    Failed(IoError),
}

/// Outcome of a finished HTTP request.
///
/// The body is kept even on failure so the device's own error text can be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCompletion {
    pub request: HttpRequestHandle,
    /// HTTP status code, absent when the request never got a response
    pub status: Option<u16>,
    pub body: String,
    /// Transport or HTTP-level error description
    pub error: Option<String>,
}

impl HttpCompletion {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status, Some(200..=299))
    }
}

// =============================================================================
// IoProvider Trait
// =============================================================================

/// Platform-independent I/O provider.
///
/// All operations are non-blocking. Receive operations return `None` when no
/// data is available instead of blocking or returning an error. Operations that
/// cannot finish immediately (TCP connect, HTTP POST) are started by one call
/// and observed through a later poll.
pub trait IoProvider {
    // -------------------------------------------------------------------------
    // UDP Operations
    // -------------------------------------------------------------------------

    /// Create a new UDP socket.
    fn udp_create(&mut self) -> Result<UdpSocketHandle, IoError>;

    /// Bind a UDP socket to a local port on all interfaces.
    ///
    /// Use port 0 to let the OS choose an available port.
    fn udp_bind(&mut self, socket: &UdpSocketHandle, port: u16) -> Result<(), IoError>;

    /// Send one datagram. Returns the number of bytes sent.
    fn udp_send_to(
        &mut self,
        socket: &UdpSocketHandle,
        data: &[u8],
        addr: SocketAddrV4,
    ) -> Result<usize, IoError>;

    /// Receive one datagram (non-blocking).
    ///
    /// Returns `Some((len, sender))` when a datagram was written to `buf`.
    fn udp_recv_from(
        &mut self,
        socket: &UdpSocketHandle,
        buf: &mut [u8],
    ) -> Option<(usize, SocketAddrV4)>;

    /// Close a UDP socket.
    fn udp_close(&mut self, socket: UdpSocketHandle);

    // -------------------------------------------------------------------------
    // TCP Operations
    // -------------------------------------------------------------------------

    /// Create a new TCP socket.
    fn tcp_create(&mut self) -> Result<TcpSocketHandle, IoError>;

    /// Start a TCP connection (non-blocking).
    ///
    /// Use `tcp_poll_connect()` to learn when the connection is established.
    fn tcp_connect(&mut self, socket: &TcpSocketHandle, addr: SocketAddrV4)
        -> Result<(), IoError>;

    /// Check on a connect started with `tcp_connect()`.
    fn tcp_poll_connect(&mut self, socket: &TcpSocketHandle) -> ConnectProgress;

    /// Check if a TCP socket is connected.
    fn tcp_is_connected(&self, socket: &TcpSocketHandle) -> bool;

    /// Check if a TCP socket is still valid (not closed by the peer or an error).
    fn tcp_is_valid(&self, socket: &TcpSocketHandle) -> bool;

    /// Send data over a TCP connection. Returns the number of bytes sent.
    fn tcp_send(&mut self, socket: &TcpSocketHandle, data: &[u8]) -> Result<usize, IoError>;

    /// Receive raw data from a TCP socket (non-blocking).
    ///
    /// Returns `None` if no data is available or the peer closed the stream;
    /// use `tcp_is_valid()` to tell the two apart.
    fn tcp_recv_raw(&mut self, socket: &TcpSocketHandle, buf: &mut [u8]) -> Option<usize>;

    /// Close a TCP socket.
    fn tcp_close(&mut self, socket: TcpSocketHandle);

    // -------------------------------------------------------------------------
    // HTTP Operations
    // -------------------------------------------------------------------------

    /// Start an HTTP POST with a JSON body (non-blocking).
    fn http_post_json(&mut self, url: &str, body: &[u8]) -> Result<HttpRequestHandle, IoError>;

    /// Take the next finished HTTP request, if any.
    fn http_poll(&mut self) -> Option<HttpCompletion>;

    // -------------------------------------------------------------------------
    // Utility
    // -------------------------------------------------------------------------

    /// Get current timestamp in milliseconds since some epoch.
    ///
    /// Used for timers and caches. The epoch doesn't matter as long
    /// as it's consistent within the session.
    fn current_time_ms(&self) -> u64;

    /// Log a debug message.
    fn debug(&self, msg: &str);

    /// Log an info message.
    fn info(&self, msg: &str);

    /// Log a warning.
    fn warn(&self, msg: &str);

    /// Log an error.
    fn error(&self, msg: &str);
}

// =============================================================================
// Helper Methods
// =============================================================================

/// Extension methods for IoProvider.
pub trait IoProviderExt: IoProvider {
    /// Log at the given level.
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Debug => self.debug(msg),
            LogLevel::Info => self.info(msg),
            LogLevel::Warn => self.warn(msg),
            LogLevel::Error => self.error(msg),
        }
    }
}

// Blanket implementation for all IoProvider types
impl<T: IoProvider> IoProviderExt for T {}

// =============================================================================
// Tests
// =============================================================================
