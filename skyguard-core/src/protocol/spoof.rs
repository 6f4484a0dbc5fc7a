//! GNSS spoofer UDP protocol
//!
//! Every datagram in both directions is ASCII framing around a compact JSON body:
//!
//! ```text
//! "FF" + 4-digit zero-padded body length + 3-digit command code + JSON body
//! FF0039602{"sKey":"a57502fcdc4e7412","iSwitch":1}
//! ```
//!
//! Commands go to the spoofer on port 9099. The spoofer sends status reports to
//! the host and port announced in the login command (9098 by default).
//! Every outbound body starts with the shared key `sKey`, copied verbatim.

use serde::Serialize;
use serde_json::Value;

use crate::error::{CommandError, ParseError};
use crate::model::GeoPosition;

// =============================================================================
// Network Constants
// =============================================================================

/// Spoofer command port
pub const COMMAND_PORT: u16 = 9099;
/// Local port the spoofer reports to, announced in the login command
pub const REPORT_PORT: u16 = 9098;

/// Packet prefix
pub const PREFIX: &[u8; 2] = b"FF";
/// Prefix + length + code
pub const HEADER_LEN: usize = 9;
/// Largest body the 4-digit length field can describe
pub const MAX_BODY_LEN: usize = 9999;

/// `iSysSta` at or above this value means the spoofer is transmitting
pub const SYS_STATE_WORKING: i64 = 3;

// =============================================================================
// Command Codes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpoofCode {
    /// Inbound status report
    Status,
    Position,
    Switch,
    Attenuation,
    Delay,
    Reboot,
    LinearMotion,
    Acceleration,
    CircularMotion,
    SystemTime,
    HeartbeatCycle,
    Login,
    Logout,
    NoFlyZoneSet,
    NoFlyZoneQuery,
}

const CODES: [(SpoofCode, &str); 15] = [
    (SpoofCode::Status, "600"),
    (SpoofCode::Position, "601"),
    (SpoofCode::Switch, "602"),
    (SpoofCode::Attenuation, "603"),
    (SpoofCode::Delay, "604"),
    (SpoofCode::Reboot, "605"),
    (SpoofCode::LinearMotion, "608"),
    (SpoofCode::Acceleration, "609"),
    (SpoofCode::CircularMotion, "610"),
    (SpoofCode::SystemTime, "613"),
    (SpoofCode::HeartbeatCycle, "615"),
    (SpoofCode::Login, "619"),
    (SpoofCode::Logout, "620"),
    (SpoofCode::NoFlyZoneSet, "705"),
    (SpoofCode::NoFlyZoneQuery, "802"),
];

impl SpoofCode {
    pub fn as_str(&self) -> &'static str {
        CODES
            .iter()
            .find(|(c, _)| c == self)
            .map(|(_, s)| *s)
            .unwrap_or("000")
    }

    pub fn from_code(code: &str) -> Option<Self> {
        CODES.iter().find(|(_, s)| *s == code).map(|(c, _)| *c)
    }
}

impl std::fmt::Display for SpoofCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Framing
// =============================================================================

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoofPacket {
    /// Three-digit code as sent; may be a code this module doesn't name
    pub code: String,
    /// Length announced in the header
    pub declared_len: usize,
    pub body: String,
}

/// Frame a code and an already-serialised body.
pub fn encode_packet(code: &str, body: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + body.len());
    packet.extend_from_slice(PREFIX);
    packet.extend_from_slice(format!("{:04}", body.len()).as_bytes());
    packet.extend_from_slice(code.as_bytes());
    packet.extend_from_slice(body.as_bytes());
    packet
}

/// Decode one datagram.
///
/// The spoofer does not always fill the length field faithfully, so the body is
/// everything after the header. Only a body shorter than announced is rejected.
pub fn decode_packet(data: &[u8]) -> Result<SpoofPacket, ParseError> {
    if data.len() < HEADER_LEN {
        return Err(ParseError::TooShort {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    if &data[..2] != PREFIX {
        return Err(ParseError::InvalidHeader {
            expected: PREFIX.to_vec(),
            actual: data[..2].to_vec(),
        });
    }

    let header = std::str::from_utf8(&data[2..HEADER_LEN]).map_err(|_| ParseError::InvalidString)?;
    if !header.is_ascii() {
        return Err(ParseError::InvalidString);
    }
    let declared_len: usize = header[..4]
        .parse()
        .map_err(|_| ParseError::InvalidPacket(format!("bad length field '{}'", &header[..4])))?;
    let code = &header[4..];
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidPacket(format!("bad command code '{}'", code)));
    }

    let body = std::str::from_utf8(&data[HEADER_LEN..]).map_err(|_| ParseError::InvalidString)?;
    if body.len() < declared_len {
        return Err(ParseError::LengthMismatch {
            header_len: declared_len,
            actual_len: body.len(),
        });
    }

    Ok(SpoofPacket {
        code: code.to_string(),
        declared_len,
        body: body.to_string(),
    })
}

fn encode_command<T: Serialize>(code: SpoofCode, body: &T) -> Result<Vec<u8>, CommandError> {
    let json = serde_json::to_string(body)?;
    if json.len() > MAX_BODY_LEN {
        return Err(CommandError::Encode(format!(
            "body of {} bytes exceeds length field",
            json.len()
        )));
    }
    Ok(encode_packet(code.as_str(), &json))
}

// =============================================================================
// Command Bodies
// =============================================================================

#[derive(Serialize)]
struct KeyOnly<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
}

#[derive(Serialize)]
struct PositionBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "dbLon")]
    lon: f64,
    #[serde(rename = "dbLat")]
    lat: f64,
    #[serde(rename = "dbAlt")]
    alt: f64,
}

#[derive(Serialize)]
struct SwitchBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "iSwitch")]
    switch: u8,
}

#[derive(Serialize)]
struct AttenuationBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "iChannel")]
    channel: i32,
    #[serde(rename = "fAtten")]
    value: f64,
}

#[derive(Serialize)]
struct DelayBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "iChannel")]
    channel: i32,
    #[serde(rename = "iDelay")]
    nanoseconds: i64,
}

#[derive(Serialize)]
struct LinearBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "fInitSpeedVal")]
    speed: f64,
    #[serde(rename = "fInitSpeedHead")]
    heading: i32,
}

#[derive(Serialize)]
struct AccelerationBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "fAccVal")]
    value: f64,
    #[serde(rename = "fAccHead")]
    heading: f64,
}

#[derive(Serialize)]
struct CircularBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "fCirRadius")]
    radius: f64,
    #[serde(rename = "fCirCycle")]
    cycle: f64,
    #[serde(rename = "iCirRotDir")]
    direction: u8,
}

#[derive(Serialize)]
struct SystemTimeBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "sTime")]
    time: &'a str,
}

#[derive(Serialize)]
struct HeartbeatCycleBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "iCycle")]
    seconds: i32,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "sIP")]
    ip: &'a str,
    #[serde(rename = "iPort")]
    port: u16,
}

#[derive(Serialize)]
struct NoFlyZoneBody<'a> {
    #[serde(rename = "sKey")]
    key: &'a str,
    #[serde(rename = "iEnable")]
    enable: u8,
    #[serde(rename = "dbLon")]
    lon: f64,
    #[serde(rename = "dbLat")]
    lat: f64,
    #[serde(rename = "fRadius")]
    radius: f64,
}

/// Circular motion rotation sense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise = 0,
    CounterClockwise = 1,
}

// =============================================================================
// Command Builders
// =============================================================================

/// 601: place the false position
pub fn create_position_command(
    key: &str,
    lon: f64,
    lat: f64,
    alt: f64,
) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::Position, &PositionBody { key, lon, lat, alt })
}

/// 602: RF output on/off
pub fn create_switch_command(key: &str, enable: bool) -> Result<Vec<u8>, CommandError> {
    encode_command(
        SpoofCode::Switch,
        &SwitchBody {
            key,
            switch: enable as u8,
        },
    )
}

/// 603: output attenuation for one channel
pub fn create_attenuation_command(
    key: &str,
    channel: i32,
    value: f64,
) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::Attenuation, &AttenuationBody { key, channel, value })
}

/// 604: signal delay for one channel
pub fn create_delay_command(
    key: &str,
    channel: i32,
    nanoseconds: i64,
) -> Result<Vec<u8>, CommandError> {
    encode_command(
        SpoofCode::Delay,
        &DelayBody {
            key,
            channel,
            nanoseconds,
        },
    )
}

/// 605
pub fn create_reboot_command(key: &str) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::Reboot, &KeyOnly { key })
}

/// 608: straight-line drift at `speed` m/s along `heading` whole degrees
pub fn create_linear_command(key: &str, speed: f64, heading: i32) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::LinearMotion, &LinearBody { key, speed, heading })
}

/// 609
pub fn create_acceleration_command(
    key: &str,
    value: f64,
    heading: f64,
) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::Acceleration, &AccelerationBody { key, value, heading })
}

/// 610: circle of `radius` meters completed every `cycle` seconds
pub fn create_circular_command(
    key: &str,
    radius: f64,
    cycle: f64,
    rotation: Rotation,
) -> Result<Vec<u8>, CommandError> {
    encode_command(
        SpoofCode::CircularMotion,
        &CircularBody {
            key,
            radius,
            cycle,
            direction: rotation as u8,
        },
    )
}

/// 613: `time` formatted `YYYY-MM-DD HH:MM:SS`
pub fn create_system_time_command(key: &str, time: &str) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::SystemTime, &SystemTimeBody { key, time })
}

/// 615: status report period
pub fn create_heartbeat_cycle_command(key: &str, seconds: i32) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::HeartbeatCycle, &HeartbeatCycleBody { key, seconds })
}

/// 619: tell the spoofer where to send reports
pub fn create_login_command(key: &str, ip: &str, port: u16) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::Login, &LoginBody { key, ip, port })
}

/// 620
pub fn create_logout_command(key: &str) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::Logout, &KeyOnly { key })
}

/// 705
pub fn create_no_fly_zone_command(
    key: &str,
    enable: bool,
    lon: f64,
    lat: f64,
    radius: f64,
) -> Result<Vec<u8>, CommandError> {
    encode_command(
        SpoofCode::NoFlyZoneSet,
        &NoFlyZoneBody {
            key,
            enable: enable as u8,
            lon,
            lat,
            radius,
        },
    )
}

/// 802
pub fn create_no_fly_zone_query(key: &str) -> Result<Vec<u8>, CommandError> {
    encode_command(SpoofCode::NoFlyZoneQuery, &KeyOnly { key })
}

// =============================================================================
// Inbound Reports
// =============================================================================

/// Spoofer health fields
#[derive(Debug, Clone, PartialEq)]
pub struct SpoofStatus {
    /// `iSysSta`
    pub sys_state: Option<i64>,
    /// `iOcxoSta`, oscillator lock
    pub ocxo_state: Option<i64>,
    pub working: bool,
}

/// Everything recognised in one inbound datagram
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpoofReport {
    /// Present when the datagram carried the `FF` framing
    pub code: Option<String>,
    pub status: Option<SpoofStatus>,
    /// Spoofer's own GNSS fix, only when it is a real fix
    pub position: Option<GeoPosition>,
}

/// Parse an unsolicited datagram from the spoofer.
///
/// Datagrams without the `FF` framing are treated as a bare JSON body.
pub fn parse_report(data: &[u8]) -> Result<SpoofReport, ParseError> {
    let (code, body) = if data.starts_with(PREFIX) && data.len() > HEADER_LEN {
        let packet = decode_packet(data)?;
        (Some(packet.code), packet.body)
    } else {
        let body = std::str::from_utf8(data).map_err(|_| ParseError::InvalidString)?;
        (None, body.to_string())
    };

    let value: Value = serde_json::from_str(&body)?;
    let obj = value
        .as_object()
        .ok_or_else(|| ParseError::InvalidPacket("report body is not a JSON object".into()))?;

    let mut report = SpoofReport {
        code,
        ..Default::default()
    };

    let is_status = report.code.as_deref() == Some(SpoofCode::Status.as_str())
        || obj.contains_key("iSysSta");
    if is_status {
        let sys_state = obj.get("iSysSta").and_then(Value::as_i64);
        report.status = Some(SpoofStatus {
            sys_state,
            ocxo_state: obj.get("iOcxoSta").and_then(Value::as_i64),
            working: sys_state.map(|s| s >= SYS_STATE_WORKING).unwrap_or(false),
        });
    }

    if let (Some(lat), Some(lng)) = (
        obj.get("dbFixLat").and_then(Value::as_f64),
        obj.get("dbFixLon").and_then(Value::as_f64),
    ) {
        // Only positive coordinates count; the spoofer reports 0.0 until it has a fix
        if lat > 1.0 && lng > 1.0 {
            report.position = Some(GeoPosition::new(lat, lng));
        }
    }

    Ok(report)
}

// =============================================================================
// Tests
// =============================================================================
