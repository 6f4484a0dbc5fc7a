//! Socket.IO detection session
//!
//! The station is the client here: it opens a WebSocket to the sensor, answers
//! the Engine.IO handshake, keeps its own heartbeat running and reopens the
//! link a fixed delay after it drops. The shell owns the WebSocket and acts on
//! the returned [`SessionOutput`].

use super::{ClearReason, DetectionEvent, DEFAULT_RECONNECT_MS, DEFAULT_WATCHDOG_MS};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::io::IoProvider;
use crate::protocol::socketio::{
    self, endpoint_url, heartbeat_interval, parse_event, parse_frame, Frame, SensorEvent,
};
use crate::timer::{IntervalTimer, OneShotTimer};

/// What the shell must do after a session call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutput {
    /// Text frames to send, in order
    pub replies: Vec<String>,
    pub events: Vec<DetectionEvent>,
    /// Open the WebSocket to [`SocketIoSession::url`]
    pub connect: bool,
}

impl SessionOutput {
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.events.is_empty() && !self.connect
    }
}

pub struct SocketIoSession {
    url: String,
    conn: ConnectionManager,
    heartbeat: IntervalTimer,
    watchdog: OneShotTimer,
    watchdog_ms: u64,
    reconnect: OneShotTimer,
    reconnect_ms: u64,
}

impl SocketIoSession {
    /// `base_url` is the sensor's HTTP base, e.g. `http://192.178.1.12:8090`.
    pub fn new(base_url: &str, watchdog_ms: u64, reconnect_ms: u64) -> Self {
        Self {
            url: endpoint_url(base_url),
            conn: ConnectionManager::new(),
            heartbeat: IntervalTimer::new(socketio::HEARTBEAT_MARGIN_MS),
            watchdog: OneShotTimer::new(),
            watchdog_ms,
            reconnect: OneShotTimer::new(),
            reconnect_ms,
        }
    }

    pub fn with_defaults(base_url: &str) -> Self {
        Self::new(base_url, DEFAULT_WATCHDOG_MS, DEFAULT_RECONNECT_MS)
    }

    /// WebSocket URL to open
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Heartbeat period in use, once the handshake has been seen
    pub fn heartbeat_ms(&self) -> Option<u64> {
        self.heartbeat
            .is_running()
            .then(|| self.heartbeat.period_ms())
    }

    pub fn start<I: IoProvider>(&mut self, io: &mut I) -> SessionOutput {
        io.info(&format!("[detection] Connecting to {}", self.url));
        self.conn.start_connecting(io.current_time_ms());
        SessionOutput {
            connect: true,
            ..Default::default()
        }
    }

    /// The WebSocket opened. The heartbeat waits for the handshake frame.
    pub fn on_open<I: IoProvider>(&mut self, io: &mut I) {
        let now = io.current_time_ms();
        self.conn.connected(now);
        self.reconnect.cancel();
        self.watchdog.arm(now, self.watchdog_ms);
        io.info("[detection] WebSocket connected");
    }

    pub fn on_frame<I: IoProvider>(&mut self, io: &mut I, text: &str) -> SessionOutput {
        let now = io.current_time_ms();
        let mut out = SessionOutput::default();
        self.conn.data_received(now);

        let frame = match parse_frame(text) {
            Ok(f) => f,
            Err(e) => {
                io.warn(&format!("[detection] Bad frame discarded: {}", e));
                return out;
            }
        };

        match frame {
            Frame::Open(handshake) => {
                out.replies.push(socketio::FRAME_CONNECT.to_string());
                if handshake.ping_interval_ms > 0 {
                    let period = heartbeat_interval(handshake.ping_interval_ms);
                    self.heartbeat.start(now, period);
                    io.info(&format!(
                        "[detection] Handshake sid={}, heartbeat every {} ms",
                        handshake.sid, period
                    ));
                } else {
                    self.heartbeat.stop();
                    io.info(&format!(
                        "[detection] Handshake sid={} without pingInterval, no heartbeat",
                        handshake.sid
                    ));
                }
            }
            Frame::Ping => out.replies.push(socketio::FRAME_PONG.to_string()),
            Frame::Pong => {}
            Frame::Connected => io.debug("[detection] Namespace connected"),
            Frame::Disconnect => io.warn("[detection] Server left the namespace"),
            Frame::Event { name, payload } => match parse_event(&name, &payload, now) {
                Ok(Some(event)) => {
                    self.watchdog.arm(now, self.watchdog_ms);
                    match event {
                        SensorEvent::Drones(d) => out.events.push(DetectionEvent::Drones(d)),
                        SensorEvent::Images(i) => out.events.push(DetectionEvent::Images(i)),
                        SensorEvent::Batch { drones, images } => {
                            out.events.push(DetectionEvent::Batch { drones, images })
                        }
                        SensorEvent::Position(Some(pos)) => {
                            out.events.push(DetectionEvent::StationPosition(pos))
                        }
                        SensorEvent::Position(None) => {}
                    }
                }
                Ok(None) => io.debug(&format!("[detection] Ignoring event '{}'", name)),
                Err(e) => io.warn(&format!("[detection] Event '{}' discarded: {}", name, e)),
            },
            Frame::Other(text) => io.debug(&format!("[detection] Unhandled frame {}", text)),
        }
        out
    }

    /// Drive heartbeat, watchdog and reconnect timers.
    pub fn poll<I: IoProvider>(&mut self, io: &mut I) -> SessionOutput {
        let now = io.current_time_ms();
        let mut out = SessionOutput::default();

        if self.conn.can_send() && self.heartbeat.tick(now) {
            out.replies.push(socketio::FRAME_PING.to_string());
        }

        if self.watchdog.expire(now) {
            io.warn(&format!(
                "[detection] No sensor data for {} ms, clearing targets",
                self.watchdog_ms
            ));
            out.events.push(DetectionEvent::Cleared(ClearReason::DataTimeout));
        }

        if self.reconnect.expire(now) && self.conn.should_reconnect() {
            io.info(&format!("[detection] Reconnecting to {}", self.url));
            self.conn.start_connecting(now);
            out.connect = true;
        }
        out
    }

    /// The WebSocket closed or the connect attempt failed.
    pub fn on_closed<I: IoProvider>(&mut self, io: &mut I, reason: &str) -> SessionOutput {
        let now = io.current_time_ms();
        let mut out = SessionOutput::default();
        if self.conn.state() == ConnectionState::ShuttingDown {
            return out;
        }

        let detail = if self.conn.can_send() {
            let detail = match self.conn.time_since_data_ms(now) {
                Some(ms) => format!("last frame {} ms ago", ms),
                None => "no frames received".to_string(),
            };
            self.conn.disconnected(now);
            out.events.push(DetectionEvent::Cleared(ClearReason::LinkLost));
            detail
        } else {
            self.conn.error(now);
            format!("attempt {} failed", self.conn.failure_count())
        };
        self.heartbeat.stop();
        self.watchdog.cancel();
        self.reconnect.arm(now, self.reconnect_ms);
        io.warn(&format!(
            "[detection] WebSocket closed ({}, {}), retrying in {} ms",
            reason, detail, self.reconnect_ms
        ));
        out
    }

    pub fn shutdown<I: IoProvider>(&mut self, io: &mut I) {
        self.conn.shutdown(io.current_time_ms());
        self.heartbeat.stop();
        self.watchdog.cancel();
        self.reconnect.cancel();
    }
}
