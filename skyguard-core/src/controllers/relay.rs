//! Relay Bank TCP Controller
//!
//! Platform-independent controller for the suppression relay bank using the
//! [`IoProvider`] trait. The bank sits behind a serial-to-TCP bridge; one
//! persistent connection carries fixed Modbus frames.
//!
//! There is no retry policy beyond this: a command issued while the link is
//! down starts a single reconnect attempt and waits for it. Frames issued in the
//! meantime are sent in order once connected, or dropped if the attempt fails.
//! A busy socket holds frames in the same queue until it drains.

use std::net::SocketAddrV4;

use super::{ControllerEvent, Outbox};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::events::LogLevel;
use crate::io::{ConnectProgress, IoProvider, TcpSocketHandle};
use crate::protocol::relay::{self, RelayTarget};

/// Frames held while a reconnect is in flight
const MAX_PENDING: usize = 16;

pub struct RelayController {
    addr: SocketAddrV4,
    socket: Option<TcpSocketHandle>,
    conn: ConnectionManager,
    pending: Vec<(RelayTarget, &'static [u8])>,
    outbox: Outbox,
}

impl RelayController {
    pub fn new(addr: SocketAddrV4) -> Self {
        Self {
            addr,
            socket: None,
            conn: ConnectionManager::new(),
            pending: Vec::new(),
            outbox: Outbox::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.can_send()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn take_events(&mut self) -> Vec<ControllerEvent> {
        self.outbox.take()
    }

    /// Start connecting if not connected or already trying.
    pub fn connect<I: IoProvider>(&mut self, io: &mut I) {
        if !self.conn.should_reconnect() {
            return;
        }
        let now = io.current_time_ms();
        self.conn.start_connecting(now);
        let socket = match io.tcp_create() {
            Ok(s) => s,
            Err(e) => {
                self.connect_failed(io, now, format!("cannot create socket: {}", e));
                return;
            }
        };
        if let Err(e) = io.tcp_connect(&socket, self.addr) {
            io.tcp_close(socket);
            self.connect_failed(io, now, e.to_string());
            return;
        }
        io.info(&format!("[relay] Connecting to {}", self.addr));
        self.socket = Some(socket);
    }

    pub fn poll<I: IoProvider>(&mut self, io: &mut I) {
        let Some(socket) = self.socket else {
            return;
        };
        let now = io.current_time_ms();

        if self.conn.is_connecting() {
            match io.tcp_poll_connect(&socket) {
                ConnectProgress::Pending => {}
                ConnectProgress::Connected => {
                    self.conn.connected(now);
                    self.outbox.report(
                        io,
                        LogLevel::Info,
                        format!("[relay] Connected to {}", self.addr),
                    );
                    self.outbox.push(ControllerEvent::RelayLink(true));
                    self.flush(io);
                }
                ConnectProgress::Failed(e) => {
                    self.socket = None;
                    io.tcp_close(socket);
                    self.connect_failed(io, now, e.to_string());
                }
            }
            return;
        }

        if self.conn.can_send() {
            if !io.tcp_is_valid(&socket) {
                self.link_lost(io, socket, "closed by peer");
                return;
            }
            if !self.pending.is_empty() {
                self.flush(io);
                if !self.conn.can_send() {
                    return;
                }
            }
            // The bank echoes each frame; nothing to act on
            let mut buf = [0u8; 256];
            while let Some(len) = io.tcp_recv_raw(&socket, &mut buf) {
                self.conn.data_received(now);
                io.debug(&format!("[relay] RX {}", relay::to_hex(&buf[..len])));
            }
        }
    }

    pub fn shutdown<I: IoProvider>(&mut self, io: &mut I) {
        self.conn.shutdown(io.current_time_ms());
        self.pending.clear();
        if let Some(socket) = self.socket.take() {
            io.tcp_close(socket);
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Switch one channel (1-7). Other channel numbers are rejected with an
    /// error log and nothing is sent.
    pub fn set_channel<I: IoProvider>(&mut self, io: &mut I, channel: i32, on: bool) {
        match relay::frame_for_channel(channel, on) {
            Ok(frame) => {
                let target = RelayTarget::Channel(channel);
                self.outbox.report(
                    io,
                    LogLevel::Info,
                    format!("[relay] {} {}", target, on_off(on)),
                );
                self.send(io, target, frame);
            }
            Err(e) => {
                self.outbox
                    .report(io, LogLevel::Error, format!("[relay] {}", e));
            }
        }
    }

    pub fn set_all<I: IoProvider>(&mut self, io: &mut I, on: bool) {
        self.outbox.report(
            io,
            LogLevel::Info,
            format!("[relay] {} {}", RelayTarget::All, on_off(on)),
        );
        self.send(io, RelayTarget::All, relay::frame_for_all(on));
    }

    fn send<I: IoProvider>(&mut self, io: &mut I, target: RelayTarget, frame: &'static [u8]) {
        if self.conn.state() == ConnectionState::ShuttingDown {
            return;
        }
        // Queued frames go first
        if let (true, Some(socket), true) =
            (self.conn.can_send(), self.socket, self.pending.is_empty())
        {
            match io.tcp_send(&socket, frame) {
                Ok(_) => {
                    io.debug(&format!("[relay] TX {}", relay::to_hex(frame)));
                    return;
                }
                Err(e) if e.is_would_block() => {
                    io.debug(&format!("[relay] Socket busy, {} queued", target));
                }
                Err(e) => {
                    self.link_lost(io, socket, &e.to_string());
                }
            }
        }

        if self.pending.len() >= MAX_PENDING {
            self.outbox.report(
                io,
                LogLevel::Error,
                format!("[relay] Queue full, {} command dropped", target),
            );
            return;
        }
        self.pending.push((target, frame));

        if self.conn.can_send() {
            self.flush(io);
        } else if self.conn.should_reconnect() {
            self.outbox.report(
                io,
                LogLevel::Warn,
                "[relay] Send failed: not connected (reconnecting)".to_string(),
            );
            self.connect(io);
        }
    }

    /// Send queued frames in order. A busy socket keeps the rest for the next
    /// poll; any other failure drops them with the link.
    fn flush<I: IoProvider>(&mut self, io: &mut I) {
        let Some(socket) = self.socket else {
            return;
        };
        while let Some(&(target, frame)) = self.pending.first() {
            match io.tcp_send(&socket, frame) {
                Ok(_) => {
                    self.pending.remove(0);
                    io.debug(&format!("[relay] TX {} ({})", relay::to_hex(frame), target));
                }
                Err(e) if e.is_would_block() => return,
                Err(e) => {
                    let dropped = std::mem::take(&mut self.pending);
                    self.outbox.report(
                        io,
                        LogLevel::Error,
                        format!(
                            "[relay] Send {} failed: {}; {} command(s) dropped",
                            target,
                            e,
                            dropped.len()
                        ),
                    );
                    self.link_lost(io, socket, &e.to_string());
                    return;
                }
            }
        }
    }

    /// The attempt is over; anything queued for it is dropped.
    fn connect_failed<I: IoProvider>(&mut self, io: &mut I, now: u64, reason: String) {
        let elapsed = self.conn.time_in_state_ms(now);
        self.conn.error(now);
        let dropped = std::mem::take(&mut self.pending);
        self.outbox.report(
            io,
            LogLevel::Error,
            format!(
                "[relay] Connect to {} failed after {} ms (attempt {}): {}; {} command(s) dropped",
                self.addr,
                elapsed,
                self.conn.failure_count(),
                reason,
                dropped.len()
            ),
        );
    }

    fn link_lost<I: IoProvider>(&mut self, io: &mut I, socket: TcpSocketHandle, reason: &str) {
        let now = io.current_time_ms();
        let quiet = match self.conn.time_since_data_ms(now) {
            Some(ms) => format!("last data {} ms ago", ms),
            None => "nothing received".to_string(),
        };
        self.socket = None;
        io.tcp_close(socket);
        self.conn.disconnected(now);
        self.outbox.report(
            io,
            LogLevel::Warn,
            format!("[relay] Link lost: {} ({})", reason, quiet),
        );
        self.outbox.push(ControllerEvent::RelayLink(false));
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
