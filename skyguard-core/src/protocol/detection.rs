//! Detection sensor stream protocol
//!
//! The sensor pushes a TCP byte stream of binary-wrapped JSON documents:
//!
//! ```text
//! 55 55 55 55 | len (u32 LE) | type (u32 LE) | {JSON} | AA AA AA AA
//! ```
//!
//! The wrapper is not trusted (lengths and types vary between firmware
//! revisions), so documents are recovered by brace counting: everything before
//! the first `{` is dropped, and the span up to the matching `}` is one document.
//! Documents are classified by their top-level keys:
//!
//! | Key | Content |
//! |-----|---------|
//! | `station_droneInfo.trace` | one located drone |
//! | `imageInfo` | one spectrum/video emitter |
//! | `fpvInfo` | one FPV video emitter |
//! | `device_status` / `station_pos` | sensor heartbeat with station position |

use serde_json::{Map, Value};

use super::{lenient_bool, lenient_f64, lenient_string};
use crate::error::ParseError;
use crate::model::{DroneTarget, GeoPosition, ImageSignal, SignalKind};

// =============================================================================
// Constants
// =============================================================================

/// Default listen port for the sensor connection
pub const DEFAULT_PORT: u16 = 8089;

/// Buffer cap; exceeding it without a complete document clears the buffer
pub const MAX_BUFFER_BYTES: usize = 100_000;

/// Wrapper magic before the length field
pub const FRAME_HEAD: [u8; 4] = [0x55, 0x55, 0x55, 0x55];
/// Wrapper magic after the document
pub const FRAME_TAIL: [u8; 4] = [0xAA, 0xAA, 0xAA, 0xAA];

pub const KEY_DRONE: &str = "station_droneInfo";
pub const KEY_IMAGE: &str = "imageInfo";
pub const KEY_FPV: &str = "fpvInfo";
pub const KEY_DEVICE_STATUS: &str = "device_status";
pub const KEY_STATION_POS: &str = "station_pos";

// =============================================================================
// Stream Reassembly
// =============================================================================

/// Incremental brace-counting JSON extractor.
///
/// Scan state survives between [`push`](Self::push) calls, so a document split
/// across TCP segments is only scanned once. Braces inside JSON strings are
/// ignored.
#[derive(Debug, Default)]
pub struct JsonStreamExtractor {
    buffer: Vec<u8>,
    /// Next byte to scan; everything before it belongs to the open document
    scan_pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonStreamExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset_scan();
    }

    /// Append bytes and return every document completed by them.
    ///
    /// A span that is not valid JSON yields an `Err` item and scanning resumes
    /// after it. When the buffer passes [`MAX_BUFFER_BYTES`] without completing
    /// a document it is cleared and `BufferOverflow` is returned last.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<Value, ParseError>> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            if self.depth == 0 && !self.sync_to_object() {
                break;
            }
            match self.scan() {
                Some(end) => {
                    let span: Vec<u8> = self.buffer.drain(..=end).collect();
                    self.reset_scan();
                    out.push(serde_json::from_slice::<Value>(&span).map_err(ParseError::from));
                }
                None => break,
            }
        }

        if self.buffer.len() > MAX_BUFFER_BYTES {
            let len = self.buffer.len();
            self.clear();
            out.push(Err(ParseError::BufferOverflow { len }));
        }
        out
    }

    /// Drop bytes up to a plausible object start. Returns false when the
    /// buffer holds no candidate yet.
    ///
    /// A `{` only counts when the next non-blank byte opens a key or closes
    /// the object, which skips brace values inside the binary wrapper.
    fn sync_to_object(&mut self) -> bool {
        let mut from = 0;
        while let Some(offset) = self.buffer[from..].iter().position(|&b| b == b'{') {
            let start = from + offset;
            match self.buffer[start + 1..]
                .iter()
                .find(|b| !b.is_ascii_whitespace())
            {
                Some(b'"') | Some(b'}') => {
                    self.buffer.drain(..start);
                    self.reset_scan();
                    return true;
                }
                // Wait for more data before judging this brace
                None => {
                    self.buffer.drain(..start);
                    self.reset_scan();
                    return false;
                }
                Some(_) => from = start + 1,
            }
        }
        self.buffer.clear();
        self.reset_scan();
        false
    }

    /// Continue scanning an object that starts at offset 0. Returns the index
    /// of the closing brace once depth returns to zero.
    fn scan(&mut self) -> Option<usize> {
        while self.scan_pos < self.buffer.len() {
            let b = self.buffer[self.scan_pos];
            let pos = self.scan_pos;
            self.scan_pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(pos);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn reset_scan(&mut self) {
        self.scan_pos = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

/// Wrap a document the way the sensor does. Used by simulators and tests.
pub fn encode_frame(document: &Value, frame_type: u32) -> Vec<u8> {
    let json = document.to_string();
    let mut frame = Vec::with_capacity(json.len() + 16);
    frame.extend_from_slice(&FRAME_HEAD);
    frame.extend_from_slice(&(json.len() as u32).to_le_bytes());
    frame.extend_from_slice(&frame_type.to_le_bytes());
    frame.extend_from_slice(json.as_bytes());
    frame.extend_from_slice(&FRAME_TAIL);
    frame
}

// =============================================================================
// Document Dispatch
// =============================================================================

/// One item carried by a sensor document
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionRecord {
    Drone(DroneTarget),
    Image(ImageSignal),
    StationPosition(GeoPosition),
}

/// Classify a document by its top-level keys.
///
/// `now_ms` stamps image signals that carry no sensor timestamp.
pub fn parse_document(value: &Value, now_ms: u64) -> Result<Vec<DetectionRecord>, ParseError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ParseError::InvalidPacket("document is not a JSON object".into()))?;

    let mut records = Vec::new();
    let mut recognised = false;

    if let Some(info) = obj.get(KEY_DRONE) {
        recognised = true;
        // Some firmware wraps the target in "trace", some sends it bare
        let trace = info.get("trace").unwrap_or(info);
        if let Some(trace) = trace.as_object() {
            records.push(DetectionRecord::Drone(parse_drone(trace)));
        }
    }
    if let Some(Value::Object(info)) = obj.get(KEY_IMAGE) {
        recognised = true;
        records.push(DetectionRecord::Image(parse_image(
            info,
            SignalKind::Spectrum,
            now_ms,
        )));
    }
    if let Some(Value::Object(info)) = obj.get(KEY_FPV) {
        recognised = true;
        records.push(DetectionRecord::Image(parse_image(info, SignalKind::Fpv, now_ms)));
    }
    if obj.contains_key(KEY_DEVICE_STATUS) || obj.contains_key(KEY_STATION_POS) {
        recognised = true;
        if let Some(pos) = obj.get(KEY_STATION_POS).and_then(parse_position) {
            records.push(DetectionRecord::StationPosition(pos));
        }
    }

    if recognised {
        Ok(records)
    } else {
        Err(ParseError::UnknownDocument(obj.keys().cloned().collect()))
    }
}

// =============================================================================
// Element Parsers
// =============================================================================

/// Parse one drone object.
///
/// Shared with the Socket.IO variant, whose numbers arrive as strings.
pub fn parse_drone(obj: &Map<String, Value>) -> DroneTarget {
    let height = obj.get("Height").or_else(|| obj.get("height"));
    let whitelisted = obj.get("whiteList").or_else(|| obj.get("whitelist"));

    DroneTarget {
        id: lenient_string(obj.get("uav_id")),
        model: lenient_string(obj.get("model_name")),
        distance: lenient_f64(obj.get("distance")),
        azimuth: lenient_f64(obj.get("azimuth")),
        lat: lenient_f64(obj.get("uav_lat")),
        lng: lenient_f64(obj.get("uav_lng")),
        height: lenient_f64(height),
        freq: lenient_f64(obj.get("freq")),
        velocity: lenient_string(obj.get("velocity")),
        pilot_lat: lenient_f64(obj.get("pilot_lat")),
        pilot_lng: lenient_f64(obj.get("pilot_lng")),
        pilot_distance: lenient_f64(obj.get("pilot_distance")),
        whitelisted: lenient_bool(whitelisted),
        uuid: lenient_string(obj.get("uuid")),
    }
}

/// Parse one emitter object.
///
/// `type == 1` or an id ending in `_fpv` marks FPV regardless of `default_kind`.
/// Signals without an id get `<kind>_<freq>`.
pub fn parse_image(obj: &Map<String, Value>, default_kind: SignalKind, now_ms: u64) -> ImageSignal {
    let mut id = lenient_string(obj.get("id"));
    let freq = lenient_f64(obj.get("freq"));

    let kind = if lenient_f64(obj.get("type")) == 1.0 || id.ends_with("_fpv") {
        SignalKind::Fpv
    } else {
        default_kind
    };
    if id.is_empty() {
        id = format!("{}_{}", kind.label(), freq);
    }

    let timestamp = match lenient_f64(obj.get("mes")) {
        t if t > 0.0 => t as u64,
        _ => now_ms,
    };

    ImageSignal {
        id,
        freq,
        amplitude: lenient_f64(obj.get("amplitude")),
        kind,
        timestamp,
    }
}

/// Parse `{lat, lng}`; `None` unless it is a real fix.
pub fn parse_position(value: &Value) -> Option<GeoPosition> {
    let pos = GeoPosition::new(lenient_f64(value.get("lat")), lenient_f64(value.get("lng")));
    pos.is_valid_fix().then_some(pos)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn drone_doc() -> Value {
        json!({
            "station_droneInfo": {
                "trace": {
                    "model_name": "Mavic 3 Pro",
                    "uav_id": "1581F45D000000",
                    "uuid": "uuid-sim-8888",
                    "uav_lat": 34.2215,
                    "uav_lng": 108.8371,
                    "Height": 120.5,
                    "pilot_lat": 34.22,
                    "pilot_lng": 108.835,
                    "pilot_distance": 150.0,
                    "distance": 500.0,
                    "freq": 2400.0,
                    "velocity": "North 5.0 m/s",
                    "azimuth": 45.0
                }
            }
        })
    }

    #[test]
    fn test_extracts_wrapped_documents() {
        let mut ex = JsonStreamExtractor::new();
        let mut stream = encode_frame(&drone_doc(), 1);
        stream.extend(encode_frame(&json!({"imageInfo": {"id": "Spectrum_2405.0"}}), 1));

        let docs = ex.push(&stream);
        assert_eq!(docs.len(), 2);
        assert!(docs[0].as_ref().unwrap().get(KEY_DRONE).is_some());
        assert!(docs[1].as_ref().unwrap().get(KEY_IMAGE).is_some());
        // Trailing AA AA AA AA is discarded on the next sync
        assert_eq!(ex.push(&[]).len(), 0);
        assert_eq!(ex.buffered(), 0);
    }

    #[test]
    fn test_document_split_across_segments() {
        let mut ex = JsonStreamExtractor::new();
        let frame = encode_frame(&drone_doc(), 1);
        let (a, b) = frame.split_at(frame.len() / 2);

        assert!(ex.push(a).is_empty());
        let docs = ex.push(b);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].as_ref().unwrap(), &drone_doc());
    }

    #[test]
    fn test_braces_inside_strings() {
        let mut ex = JsonStreamExtractor::new();
        let docs = ex.push(br#"xx{"a":"}{\"}","b":{"c":1}}yy"#);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].as_ref().unwrap()["b"]["c"], 1);
    }

    #[test]
    fn test_wrapper_brace_byte_is_skipped() {
        // Length field 0x7B ('{') followed by binary
        let mut ex = JsonStreamExtractor::new();
        let mut data = vec![0x55, 0x55, 0x55, 0x55, 0x7B, 0x00, 0x00, 0x00];
        data.extend_from_slice(br#"{"fpvInfo":{"freq":5800.0}}"#);
        let docs = ex.push(&data);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].as_ref().unwrap().get(KEY_FPV).is_some());
    }

    #[test]
    fn test_malformed_span_is_discarded() {
        let mut ex = JsonStreamExtractor::new();
        let docs = ex.push(br#"{"a":1,,}{"b":2}"#);
        assert_eq!(docs.len(), 2);
        assert!(matches!(docs[0], Err(ParseError::MalformedJson(_))));
        assert_eq!(docs[1].as_ref().unwrap()["b"], 2);
    }

    #[test]
    fn test_overflow_without_brace_clears() {
        let mut ex = JsonStreamExtractor::new();
        let junk = vec![0x11u8; MAX_BUFFER_BYTES + 1];
        let docs = ex.push(&junk);
        // No '{' at all: junk is dropped during sync
        assert!(docs.is_empty());
        assert_eq!(ex.buffered(), 0);
    }

    #[test]
    fn test_overflow_with_open_document_clears() {
        let mut ex = JsonStreamExtractor::new();
        assert!(ex.push(br#"{"k":""#).is_empty());
        let docs = ex.push(&vec![b'x'; MAX_BUFFER_BYTES]);
        assert_eq!(docs.len(), 1);
        assert!(matches!(docs[0], Err(ParseError::BufferOverflow { .. })));
        assert_eq!(ex.buffered(), 0);

        // Recovers afterwards
        let docs = ex.push(br#"{"imageInfo":{}}"#);
        assert_eq!(docs.len(), 1);
        assert!(docs[0].is_ok());
    }

    #[test]
    fn test_parse_drone_document() {
        let records = parse_document(&drone_doc(), 5).unwrap();
        assert_eq!(records.len(), 1);
        let DetectionRecord::Drone(drone) = &records[0] else {
            panic!("expected drone");
        };
        assert_eq!(drone.id, "1581F45D000000");
        assert_eq!(drone.uuid, "uuid-sim-8888");
        assert_eq!(drone.model, "Mavic 3 Pro");
        assert_eq!(drone.height, 120.5);
        assert_eq!(drone.distance, 500.0);
        assert_eq!(drone.azimuth, 45.0);
        assert_eq!(drone.velocity, "North 5.0 m/s");
        assert!(!drone.whitelisted);
    }

    #[test]
    fn test_parse_image_documents() {
        let doc = json!({
            "imageInfo": {"id": "Spectrum_2405.0", "freq": 2405.0, "amplitude": 300, "pro": "DJIO2", "type": 0, "mes": 1700000000000u64},
            "station_id": "sim_station_01"
        });
        let records = parse_document(&doc, 5).unwrap();
        let DetectionRecord::Image(img) = &records[0] else {
            panic!("expected image");
        };
        assert_eq!(img.kind, SignalKind::Spectrum);
        assert_eq!(img.amplitude, 300.0);
        assert_eq!(img.timestamp, 1_700_000_000_000);

        let fpv = json!({"fpvInfo": {"freq": 5600.0, "amplitude": 700}});
        let records = parse_document(&fpv, 5).unwrap();
        let DetectionRecord::Image(img) = &records[0] else {
            panic!("expected image");
        };
        assert_eq!(img.kind, SignalKind::Fpv);
        assert_eq!(img.id, "FPV_5600");
        assert_eq!(img.timestamp, 5);
    }

    #[test]
    fn test_parse_heartbeat_document() {
        let doc = json!({
            "device_status": {"type": 0, "drone": 1, "gps": 1},
            "station_pos": {"lat": 34.219146, "lng": 108.835316}
        });
        let records = parse_document(&doc, 0).unwrap();
        assert_eq!(
            records,
            vec![DetectionRecord::StationPosition(GeoPosition::new(34.219146, 108.835316))]
        );

        // Heartbeat without a fix is recognised but carries nothing
        let doc = json!({"device_status": {}, "station_pos": {"lat": 0, "lng": 0}});
        assert!(parse_document(&doc, 0).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_document_reports_keys() {
        let err = parse_document(&json!({"foo": 1, "bar": 2}), 0).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownDocument(vec!["bar".to_string(), "foo".to_string()])
        );
    }
}
