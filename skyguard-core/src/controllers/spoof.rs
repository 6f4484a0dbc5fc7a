//! GNSS Spoofer UDP Controller
//!
//! Platform-independent controller for the spoofer using the [`IoProvider`]
//! trait. One UDP socket, bound to the report port, is used both to send
//! commands and to receive the spoofer's unsolicited reports.
//!
//! # Session
//!
//! ```text
//! start ──▶ bind 9098 ──▶ 619 login {sIP, iPort} ──▶ 613 time sync
//!                               │
//!                 spoofer sends 600 status / position reports to sIP:iPort
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};

use super::{ControllerEvent, Outbox};
use crate::error::CommandError;
use crate::events::LogLevel;
use crate::io::{IoProvider, UdpSocketHandle};
use crate::protocol::spoof::{self, Rotation, SpoofCode, SpoofStatus};

/// Largest report we expect
const RECV_BUFFER: usize = 4096;

pub struct SpoofController {
    target: SocketAddrV4,
    key: String,
    report_port: u16,
    local_ip: Ipv4Addr,
    socket: Option<UdpSocketHandle>,
    last_status: Option<SpoofStatus>,
    outbox: Outbox,
}

impl SpoofController {
    pub fn new(target: SocketAddrV4, key: &str, report_port: u16, local_ip: Ipv4Addr) -> Self {
        Self {
            target,
            key: key.to_string(),
            report_port,
            local_ip,
            socket: None,
            last_status: None,
            outbox: Outbox::default(),
        }
    }

    pub fn target(&self) -> SocketAddrV4 {
        self.target
    }

    pub fn last_status(&self) -> Option<&SpoofStatus> {
        self.last_status.as_ref()
    }

    pub fn take_events(&mut self) -> Vec<ControllerEvent> {
        self.outbox.take()
    }

    /// Open the socket, log in and sync the spoofer clock.
    ///
    /// `wall_time` is local time formatted `YYYY-MM-DD HH:MM:SS`.
    pub fn start<I: IoProvider>(&mut self, io: &mut I, wall_time: &str) {
        if self.open_socket(io) {
            self.login(io);
            self.set_system_time(io, wall_time);
        }
    }

    fn open_socket<I: IoProvider>(&mut self, io: &mut I) -> bool {
        if self.socket.is_some() {
            return true;
        }
        let socket = match io.udp_create() {
            Ok(s) => s,
            Err(e) => {
                io.error(&format!("[spoof] Failed to create socket: {}", e));
                return false;
            }
        };
        if let Err(e) = io.udp_bind(&socket, self.report_port) {
            // Commands still work; reports will not reach us
            io.warn(&format!(
                "[spoof] Cannot bind report port {}: {}, using an ephemeral port",
                self.report_port, e
            ));
            if let Err(e) = io.udp_bind(&socket, 0) {
                io.error(&format!("[spoof] Failed to bind socket: {}", e));
                io.udp_close(socket);
                return false;
            }
        }
        io.debug(&format!(
            "[spoof] Socket ready on port {} for {}",
            self.report_port, self.target
        ));
        self.socket = Some(socket);
        true
    }

    /// Read pending reports.
    pub fn poll<I: IoProvider>(&mut self, io: &mut I) {
        let Some(socket) = self.socket else {
            return;
        };
        let mut buf = [0u8; RECV_BUFFER];
        while let Some((len, from)) = io.udp_recv_from(&socket, &mut buf) {
            match spoof::parse_report(&buf[..len]) {
                Ok(report) => {
                    if let Some(status) = report.status {
                        if self.last_status.as_ref() != Some(&status) {
                            io.info(&format!(
                                "[spoof] Status sys={:?} ocxo={:?} working={}",
                                status.sys_state, status.ocxo_state, status.working
                            ));
                            self.last_status = Some(status.clone());
                            self.outbox.push(ControllerEvent::SpoofStatus(status));
                        }
                    }
                    if let Some(pos) = report.position {
                        self.outbox.push(ControllerEvent::SelfPosition(pos));
                    }
                }
                Err(e) => {
                    io.debug(&format!("[spoof] Ignoring datagram from {}: {}", from, e));
                }
            }
        }
    }

    pub fn shutdown<I: IoProvider>(&mut self, io: &mut I) {
        if let Some(socket) = self.socket.take() {
            io.udp_close(socket);
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    pub fn login<I: IoProvider>(&mut self, io: &mut I) {
        let ip = self.local_ip.to_string();
        let packet = spoof::create_login_command(&self.key, &ip, self.report_port);
        if self.send(io, SpoofCode::Login, packet) {
            self.outbox.report(
                io,
                LogLevel::Info,
                format!("[spoof] Login sent, reports to {}:{}", ip, self.report_port),
            );
        }
    }

    pub fn logout<I: IoProvider>(&mut self, io: &mut I) {
        let packet = spoof::create_logout_command(&self.key);
        self.send(io, SpoofCode::Logout, packet);
    }

    pub fn set_position<I: IoProvider>(&mut self, io: &mut I, lon: f64, lat: f64, alt: f64) {
        let packet = spoof::create_position_command(&self.key, lon, lat, alt);
        self.send(io, SpoofCode::Position, packet);
    }

    pub fn set_switch<I: IoProvider>(&mut self, io: &mut I, enable: bool) {
        let packet = spoof::create_switch_command(&self.key, enable);
        if self.send(io, SpoofCode::Switch, packet) {
            self.outbox.report(
                io,
                LogLevel::Info,
                format!("[spoof] RF switch {}", if enable { "ON" } else { "OFF" }),
            );
        }
    }

    pub fn start_circular<I: IoProvider>(&mut self, io: &mut I, radius: f64, cycle: f64) {
        let packet = spoof::create_circular_command(&self.key, radius, cycle, Rotation::Clockwise);
        if self.send(io, SpoofCode::CircularMotion, packet) {
            self.outbox.report(
                io,
                LogLevel::Info,
                format!("[spoof] Circular track R={} m, T={} s", radius, cycle),
            );
        }
    }

    pub fn start_linear<I: IoProvider>(&mut self, io: &mut I, speed: f64, heading_deg: i32) {
        let packet = spoof::create_linear_command(&self.key, speed, heading_deg);
        if self.send(io, SpoofCode::LinearMotion, packet) {
            self.outbox.report(
                io,
                LogLevel::Info,
                format!("[spoof] Directional drift {}° at {} m/s", heading_deg, speed),
            );
        }
    }

    pub fn set_acceleration<I: IoProvider>(&mut self, io: &mut I, value: f64, heading_deg: f64) {
        let packet = spoof::create_acceleration_command(&self.key, value, heading_deg);
        self.send(io, SpoofCode::Acceleration, packet);
    }

    pub fn set_attenuation<I: IoProvider>(&mut self, io: &mut I, channel: i32, value: f64) {
        let packet = spoof::create_attenuation_command(&self.key, channel, value);
        self.send(io, SpoofCode::Attenuation, packet);
    }

    pub fn set_delay<I: IoProvider>(&mut self, io: &mut I, channel: i32, nanoseconds: i64) {
        let packet = spoof::create_delay_command(&self.key, channel, nanoseconds);
        self.send(io, SpoofCode::Delay, packet);
    }

    pub fn set_no_fly_zone<I: IoProvider>(
        &mut self,
        io: &mut I,
        enable: bool,
        lon: f64,
        lat: f64,
        radius: f64,
    ) {
        let packet = spoof::create_no_fly_zone_command(&self.key, enable, lon, lat, radius);
        self.send(io, SpoofCode::NoFlyZoneSet, packet);
    }

    pub fn query_no_fly_zone<I: IoProvider>(&mut self, io: &mut I) {
        let packet = spoof::create_no_fly_zone_query(&self.key);
        self.send(io, SpoofCode::NoFlyZoneQuery, packet);
    }

    pub fn set_system_time<I: IoProvider>(&mut self, io: &mut I, wall_time: &str) {
        let packet = spoof::create_system_time_command(&self.key, wall_time);
        self.send(io, SpoofCode::SystemTime, packet);
    }

    pub fn set_heartbeat_cycle<I: IoProvider>(&mut self, io: &mut I, seconds: i32) {
        let packet = spoof::create_heartbeat_cycle_command(&self.key, seconds);
        self.send(io, SpoofCode::HeartbeatCycle, packet);
    }

    pub fn reboot<I: IoProvider>(&mut self, io: &mut I) {
        let packet = spoof::create_reboot_command(&self.key);
        if self.send(io, SpoofCode::Reboot, packet) {
            self.outbox
                .report(io, LogLevel::Warn, "[spoof] Reboot requested".to_string());
        }
    }

    /// Returns true if the datagram left.
    fn send<I: IoProvider>(
        &mut self,
        io: &mut I,
        code: SpoofCode,
        packet: Result<Vec<u8>, CommandError>,
    ) -> bool {
        let packet = match packet {
            Ok(p) => p,
            Err(e) => {
                io.error(&format!("[spoof] Cannot encode {}: {}", code, e));
                return false;
            }
        };
        if !self.open_socket(io) {
            return false;
        }
        let Some(socket) = self.socket else {
            return false;
        };
        match io.udp_send_to(&socket, &packet, self.target) {
            Ok(_) => {
                io.debug(&format!(
                    "[spoof] TX {}",
                    String::from_utf8_lossy(&packet)
                ));
                true
            }
            Err(e) => {
                self.outbox.report(
                    io,
                    LogLevel::Error,
                    format!("[spoof] Send {} failed: {}", code, e),
                );
                false
            }
        }
    }
}
