//! Station configuration
//!
//! Endpoints, keys and thresholds are explicit values handed to the engine at
//! startup. Two built-in profiles cover the bench simulator and the deployed
//! hardware; the shell overrides individual fields from the command line.

use std::net::{Ipv4Addr, SocketAddrV4};

use serde::{Deserialize, Serialize};

use crate::detection::{DEFAULT_RECONNECT_MS, DEFAULT_TARGET_TTL_MS, DEFAULT_WATCHDOG_MS};
use crate::model::GeoPosition;
use crate::protocol::{detection, jammer, relay, spoof};

/// Shared key expected by the spoofer
pub const DEFAULT_SPOOF_KEY: &str = "a57502fcdc4e7412";
/// Announced in the spoofer login when no interface on its subnet is found
pub const DEFAULT_LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 10, 100);
/// Used for the false position until the sensor reports where we are
pub const DEFAULT_BASE_POSITION: GeoPosition = GeoPosition::new(31.2304, 121.4737);

/// Which detection deployment is wired up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMode {
    /// Sensor connects to us and streams wrapped JSON
    #[default]
    TcpServer,
    /// We connect to the sensor's Socket.IO endpoint
    SocketIo,
}

/// Circular spoofing track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircleParams {
    pub radius_m: f64,
    pub cycle_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    pub spoof_addr: SocketAddrV4,
    /// Local port the spoofer reports to
    pub spoof_report_port: u16,
    pub spoof_key: String,
    /// Address announced in the spoofer login
    pub local_ip: Ipv4Addr,

    pub jammer_addr: SocketAddrV4,
    pub relay_addr: SocketAddrV4,

    pub detection_mode: DetectionMode,
    /// Listen port for [`DetectionMode::TcpServer`]
    pub detection_port: u16,
    /// Base URL for [`DetectionMode::SocketIo`]
    pub detection_url: String,

    pub base_position: GeoPosition,
    pub base_alt: f64,

    /// Quiet period before Auto mode stands down
    pub debounce_ms: u64,
    /// Distance at which suppression joins spoofing
    pub red_zone_m: f64,
    pub auto_circle: CircleParams,
    pub manual_circle: CircleParams,
    /// Drift speed for manual directional deterrence, m/s
    pub direction_speed: f64,

    pub watchdog_ms: u64,
    pub target_ttl_ms: u64,
    pub reconnect_ms: u64,
}

impl StationConfig {
    /// Everything on localhost, for the hardware simulators.
    pub fn simulation() -> Self {
        let localhost = Ipv4Addr::LOCALHOST;
        Self {
            spoof_addr: SocketAddrV4::new(localhost, spoof::COMMAND_PORT),
            spoof_report_port: spoof::REPORT_PORT,
            spoof_key: DEFAULT_SPOOF_KEY.to_string(),
            local_ip: DEFAULT_LOCAL_IP,
            jammer_addr: SocketAddrV4::new(localhost, jammer::DEFAULT_PORT),
            relay_addr: SocketAddrV4::new(localhost, relay::DEFAULT_PORT),
            detection_mode: DetectionMode::TcpServer,
            detection_port: detection::DEFAULT_PORT,
            detection_url: format!("http://{}:{}", localhost, jammer::DEFAULT_PORT),
            base_position: DEFAULT_BASE_POSITION,
            base_alt: 0.0,
            debounce_ms: 10_000,
            red_zone_m: 1000.0,
            auto_circle: CircleParams {
                radius_m: 500.0,
                cycle_s: 50.0,
            },
            manual_circle: CircleParams {
                radius_m: 100.0,
                cycle_s: 50.0,
            },
            direction_speed: 15.0,
            watchdog_ms: DEFAULT_WATCHDOG_MS,
            target_ttl_ms: DEFAULT_TARGET_TTL_MS,
            reconnect_ms: DEFAULT_RECONNECT_MS,
        }
    }

    /// Deployed station network.
    pub fn field() -> Self {
        let sensor = Ipv4Addr::new(192, 178, 1, 12);
        Self {
            spoof_addr: SocketAddrV4::new(Ipv4Addr::new(192, 168, 10, 230), spoof::COMMAND_PORT),
            jammer_addr: SocketAddrV4::new(sensor, jammer::DEFAULT_PORT),
            detection_url: format!("http://{}:{}", sensor, jammer::DEFAULT_PORT),
            ..Self::simulation()
        }
    }

    /// `"192.168.10."` style prefix of the spoofer's /24, used to pick the
    /// local interface announced in the login.
    pub fn spoof_subnet_prefix(&self) -> String {
        let [a, b, c, _] = self.spoof_addr.ip().octets();
        format!("{}.{}.{}.", a, b, c)
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self::simulation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        let sim = StationConfig::simulation();
        assert_eq!(sim.spoof_addr.to_string(), "127.0.0.1:9099");
        assert_eq!(sim.jammer_addr.to_string(), "127.0.0.1:8090");
        assert_eq!(sim.relay_addr.to_string(), "127.0.0.1:2000");
        assert_eq!(sim.detection_port, 8089);

        let field = StationConfig::field();
        assert_eq!(field.spoof_addr.to_string(), "192.168.10.230:9099");
        assert_eq!(field.jammer_addr.to_string(), "192.178.1.12:8090");
        assert_eq!(field.detection_url, "http://192.178.1.12:8090");
        assert_eq!(field.spoof_subnet_prefix(), "192.168.10.");

        // Thresholds are shared
        assert_eq!(field.debounce_ms, 10_000);
        assert_eq!(field.red_zone_m, 1000.0);
        assert_eq!(field.auto_circle.radius_m, 500.0);
        assert_eq!(field.manual_circle.radius_m, 100.0);
        assert_eq!(field.spoof_key, "a57502fcdc4e7412");
    }

    #[test]
    fn test_config_json() {
        let json = serde_json::to_string(&StationConfig::field()).unwrap();
        assert!(json.contains(r#""detection_mode":"tcp-server""#));
        let back: StationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StationConfig::field());
    }
}
