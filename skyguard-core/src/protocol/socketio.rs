//! Socket.IO (Engine.IO v4) text framing for the detection WebSocket
//!
//! Only the subset the sensor uses is understood:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `0{...}` | open, carries `sid`, `pingInterval`, `pingTimeout` |
//! | `40` | namespace connected (sent by us after open, echoed by server) |
//! | `41` | namespace disconnect |
//! | `2` | ping, answered with `3` |
//! | `3` | pong |
//! | `42["event",payload]` | application event |
//!
//! Application events: `droneStatus`, `imageStatus`, `detect_batch`, `info`.

use serde_json::Value;

use super::detection::{parse_drone, parse_image, parse_position};
use crate::error::ParseError;
use crate::model::{DroneTarget, GeoPosition, ImageSignal, SignalKind};

// =============================================================================
// Constants
// =============================================================================

/// Path and query appended to the sensor base URL
pub const ENDPOINT_SUFFIX: &str = "socket.io/?EIO=4&transport=websocket";

pub const FRAME_CONNECT: &str = "40";
pub const FRAME_PING: &str = "2";
pub const FRAME_PONG: &str = "3";

/// Margin subtracted from the server ping interval for our own heartbeat
pub const HEARTBEAT_MARGIN_MS: u64 = 5000;

pub const EVENT_DRONE_STATUS: &str = "droneStatus";
pub const EVENT_IMAGE_STATUS: &str = "imageStatus";
pub const EVENT_DETECT_BATCH: &str = "detect_batch";
pub const EVENT_INFO: &str = "info";

// =============================================================================
// Frames
// =============================================================================

/// Engine.IO open packet payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Handshake {
    pub sid: String,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Connected,
    Disconnect,
    Ping,
    Pong,
    Event { name: String, payload: Value },
    /// Anything else (binary attachments, acks, other namespaces)
    Other(String),
}

/// WebSocket URL for a sensor base URL such as `http://192.178.1.12:8090`.
pub fn endpoint_url(base: &str) -> String {
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    if ws.ends_with('/') {
        format!("{}{}", ws, ENDPOINT_SUFFIX)
    } else {
        format!("{}/{}", ws, ENDPOINT_SUFFIX)
    }
}

/// Our heartbeat period: 5 s under the server's interval, or the interval
/// itself when it is too short to subtract from.
pub fn heartbeat_interval(ping_interval_ms: u64) -> u64 {
    if ping_interval_ms > HEARTBEAT_MARGIN_MS {
        ping_interval_ms - HEARTBEAT_MARGIN_MS
    } else {
        ping_interval_ms
    }
}

pub fn parse_frame(text: &str) -> Result<Frame, ParseError> {
    if let Some(payload) = text.strip_prefix("42") {
        let value: Value = serde_json::from_str(payload)?;
        let arr = value
            .as_array()
            .ok_or_else(|| ParseError::InvalidPacket("event frame is not an array".into()))?;
        let name = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::InvalidPacket("event frame without a name".into()))?;
        return Ok(Frame::Event {
            name: name.to_string(),
            payload: arr.get(1).cloned().unwrap_or(Value::Null),
        });
    }

    match text {
        "40" => return Ok(Frame::Connected),
        "41" => return Ok(Frame::Disconnect),
        "2" => return Ok(Frame::Ping),
        "3" => return Ok(Frame::Pong),
        _ => {}
    }
    if text.starts_with("40{") {
        return Ok(Frame::Connected);
    }

    if let Some(payload) = text.strip_prefix('0') {
        let value: Value = serde_json::from_str(payload)?;
        return Ok(Frame::Open(Handshake {
            sid: value
                .get("sid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            ping_interval_ms: value.get("pingInterval").and_then(Value::as_u64).unwrap_or(0),
            ping_timeout_ms: value.get("pingTimeout").and_then(Value::as_u64).unwrap_or(0),
        }));
    }

    Ok(Frame::Other(text.to_string()))
}

// =============================================================================
// Event Payloads
// =============================================================================

/// Decoded application event
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    Drones(Vec<DroneTarget>),
    Images(Vec<ImageSignal>),
    Batch {
        drones: Vec<DroneTarget>,
        images: Vec<ImageSignal>,
    },
    /// Station position; `None` when the sensor has no fix
    Position(Option<GeoPosition>),
}

/// Decode the payload of a `42` frame.
///
/// Returns `Ok(None)` for event names the station does not use.
pub fn parse_event(name: &str, payload: &Value, now_ms: u64) -> Result<Option<SensorEvent>, ParseError> {
    match name {
        EVENT_DRONE_STATUS => Ok(Some(SensorEvent::Drones(parse_drone_array(payload)?))),
        EVENT_IMAGE_STATUS => Ok(Some(SensorEvent::Images(parse_image_array(payload, now_ms)?))),
        EVENT_DETECT_BATCH => {
            if !payload.is_object() {
                return Err(ParseError::InvalidPacket("detect_batch is not an object".into()));
            }
            let drones = match payload.get("drones") {
                Some(v) => parse_drone_array(v)?,
                None => Vec::new(),
            };
            let images = match payload.get("images") {
                Some(v) => parse_image_array(v, now_ms)?,
                None => Vec::new(),
            };
            Ok(Some(SensorEvent::Batch { drones, images }))
        }
        EVENT_INFO => {
            if !payload.is_object() {
                return Err(ParseError::InvalidPacket("info is not an object".into()));
            }
            Ok(Some(SensorEvent::Position(parse_position(payload))))
        }
        _ => Ok(None),
    }
}

/// `[{"uav_info": {...}}, ...]`; bare drone objects are accepted too.
fn parse_drone_array(payload: &Value) -> Result<Vec<DroneTarget>, ParseError> {
    let arr = payload
        .as_array()
        .ok_or_else(|| ParseError::InvalidPacket("drone list is not an array".into()))?;
    Ok(arr
        .iter()
        .filter_map(|item| {
            item.get("uav_info")
                .unwrap_or(item)
                .as_object()
                .map(parse_drone)
        })
        .collect())
}

fn parse_image_array(payload: &Value, now_ms: u64) -> Result<Vec<ImageSignal>, ParseError> {
    let arr = payload
        .as_array()
        .ok_or_else(|| ParseError::InvalidPacket("image list is not an array".into()))?;
    Ok(arr
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| parse_image(obj, SignalKind::Spectrum, now_ms))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("http://192.178.1.12:8090"),
            "ws://192.178.1.12:8090/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            endpoint_url("https://sensor.local/"),
            "wss://sensor.local/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_heartbeat_interval() {
        assert_eq!(heartbeat_interval(25000), 20000);
        assert_eq!(heartbeat_interval(5000), 5000);
        assert_eq!(heartbeat_interval(3000), 3000);
    }

    #[test]
    fn test_control_frames() {
        let open = parse_frame(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#)
            .unwrap();
        assert_eq!(
            open,
            Frame::Open(Handshake {
                sid: "abc".into(),
                ping_interval_ms: 25000,
                ping_timeout_ms: 20000,
            })
        );
        assert_eq!(parse_frame("40").unwrap(), Frame::Connected);
        assert_eq!(parse_frame(r#"40{"sid":"x"}"#).unwrap(), Frame::Connected);
        assert_eq!(parse_frame("41").unwrap(), Frame::Disconnect);
        assert_eq!(parse_frame("2").unwrap(), Frame::Ping);
        assert_eq!(parse_frame("3").unwrap(), Frame::Pong);
        assert_eq!(parse_frame("6").unwrap(), Frame::Other("6".into()));
        assert!(matches!(parse_frame("0{bad"), Err(ParseError::MalformedJson(_))));
    }

    #[test]
    fn test_event_frame() {
        let frame = parse_frame(r#"42["info",{"lat":31.2,"lng":121.4}]"#).unwrap();
        let Frame::Event { name, payload } = frame else {
            panic!("expected event");
        };
        assert_eq!(name, "info");
        assert_eq!(
            parse_event(&name, &payload, 0).unwrap(),
            Some(SensorEvent::Position(Some(GeoPosition::new(31.2, 121.4))))
        );
        assert!(matches!(parse_frame(r#"42{"a":1}"#), Err(ParseError::InvalidPacket(_))));
    }

    #[test]
    fn test_drone_status_with_string_numbers() {
        let payload = json!([
            {"uav_info": {"uav_id": "D1", "model_name": "Mini 3", "uav_lat": "31.2401", "uav_lng": "121.4802", "distance": "812.5", "freq": 2437.0, "whiteList": false}},
            {"uav_info": {"uav_id": "D2", "uav_lat": "0", "uav_lng": "0", "distance": "--", "whiteList": true}},
            {"no_info": {}}
        ]);
        let Some(SensorEvent::Drones(drones)) = parse_event("droneStatus", &payload, 0).unwrap() else {
            panic!("expected drones");
        };
        assert_eq!(drones.len(), 2);
        assert_eq!(drones[0].distance, 812.5);
        assert_eq!(drones[0].lat, 31.2401);
        assert_eq!(drones[1].distance, 0.0);
        assert!(drones[1].whitelisted);
    }

    #[test]
    fn test_image_status_classification() {
        let payload = json!([
            {"id": "sig_fpv", "freq": 5800.0, "amplitude": 80},
            {"id": "sig_2", "freq": 2400.0, "type": 1},
            {"id": "sig_3", "freq": 1200.0, "type": 0}
        ]);
        let Some(SensorEvent::Images(images)) = parse_event("imageStatus", &payload, 7).unwrap() else {
            panic!("expected images");
        };
        let kinds: Vec<_> = images.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![SignalKind::Fpv, SignalKind::Fpv, SignalKind::Spectrum]);
        assert_eq!(images[0].timestamp, 7);
    }

    #[test]
    fn test_detect_batch() {
        let payload = json!({"drones": [], "images": [{"id": "a", "freq": 2400.0}]});
        let event = parse_event("detect_batch", &payload, 0).unwrap();
        let Some(SensorEvent::Batch { drones, images }) = event else {
            panic!("expected batch");
        };
        assert!(drones.is_empty());
        assert_eq!(images.len(), 1);

        assert_eq!(parse_event("chat", &json!({}), 0).unwrap(), None);
        assert!(parse_event("droneStatus", &json!({}), 0).is_err());
    }
}
