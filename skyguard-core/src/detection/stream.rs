//! TCP detection stream
//!
//! The sensor connects to the station and pushes one document per target
//! update. Targets are cached by identity and expire when the sensor stops
//! mentioning them; every change re-emits both complete lists.

use super::cache::TtlCache;
use super::{ClearReason, DetectionEvent, DEFAULT_TARGET_TTL_MS, DEFAULT_WATCHDOG_MS};
use crate::error::ParseError;
use crate::io::IoProvider;
use crate::model::{DroneTarget, ImageSignal};
use crate::protocol::detection::{parse_document, DetectionRecord, JsonStreamExtractor};
use crate::timer::{IntervalTimer, OneShotTimer};

/// How often cached targets are checked for expiry
const EXPIRY_SWEEP_MS: u64 = 500;

pub struct DetectionStream {
    extractor: JsonStreamExtractor,
    drones: TtlCache<DroneTarget>,
    images: TtlCache<ImageSignal>,
    watchdog: OneShotTimer,
    watchdog_ms: u64,
    sweep: IntervalTimer,
    connected: bool,
}

impl DetectionStream {
    pub fn new(watchdog_ms: u64, ttl_ms: u64) -> Self {
        Self {
            extractor: JsonStreamExtractor::new(),
            drones: TtlCache::new(ttl_ms),
            images: TtlCache::new(ttl_ms),
            watchdog: OneShotTimer::new(),
            watchdog_ms,
            sweep: IntervalTimer::new(EXPIRY_SWEEP_MS),
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// A sensor connected. Any previous connection has already been closed by
    /// the shell; its partial data must not leak into the new stream.
    pub fn on_connected<I: IoProvider>(&mut self, io: &mut I, peer: &str) {
        let now = io.current_time_ms();
        if self.connected {
            io.warn(&format!(
                "[detection] {} replaces the previous sensor connection",
                peer
            ));
        } else {
            io.info(&format!("[detection] Sensor connected from {}", peer));
        }
        self.extractor.clear();
        self.connected = true;
        self.watchdog.arm(now, self.watchdog_ms);
        self.sweep.start(now, EXPIRY_SWEEP_MS);
    }

    /// Feed received bytes.
    pub fn on_data<I: IoProvider>(&mut self, io: &mut I, data: &[u8]) -> Vec<DetectionEvent> {
        let now = io.current_time_ms();
        let mut events = Vec::new();
        let mut lists_changed = false;

        for doc in self.extractor.push(data) {
            let value = match doc {
                Ok(v) => v,
                Err(ParseError::BufferOverflow { len }) => {
                    io.warn(&format!(
                        "[detection] Dropped {} buffered bytes without a complete document",
                        len
                    ));
                    continue;
                }
                Err(e) => {
                    io.warn(&format!("[detection] Discarded span: {}", e));
                    continue;
                }
            };

            let records = match parse_document(&value, now) {
                Ok(r) => r,
                Err(e) => {
                    io.warn(&format!("[detection] {}", e));
                    continue;
                }
            };

            self.watchdog.arm(now, self.watchdog_ms);
            for record in records {
                match record {
                    DetectionRecord::Drone(drone) => {
                        let key = drone.key().to_string();
                        self.drones.insert(key, drone, now);
                        lists_changed = true;
                    }
                    DetectionRecord::Image(image) => {
                        self.images.insert(image.id.clone(), image, now);
                        lists_changed = true;
                    }
                    DetectionRecord::StationPosition(pos) => {
                        events.push(DetectionEvent::StationPosition(pos));
                    }
                }
            }
        }

        if lists_changed {
            events.push(self.snapshot());
        }
        events
    }

    /// Drive the watchdog and target expiry.
    pub fn poll<I: IoProvider>(&mut self, io: &mut I) -> Vec<DetectionEvent> {
        let now = io.current_time_ms();
        let mut events = Vec::new();

        if self.watchdog.expire(now) {
            io.warn(&format!(
                "[detection] No sensor data for {} ms, clearing targets",
                self.watchdog_ms
            ));
            self.drones.clear();
            self.images.clear();
            events.push(DetectionEvent::Cleared(ClearReason::DataTimeout));
            return events;
        }

        if self.sweep.tick(now) {
            let drones_gone = self.drones.expire(now);
            let images_gone = self.images.expire(now);
            if drones_gone || images_gone {
                events.push(self.snapshot());
            }
        }
        events
    }

    pub fn on_disconnected<I: IoProvider>(&mut self, io: &mut I) -> Vec<DetectionEvent> {
        if !self.connected {
            return Vec::new();
        }
        io.info("[detection] Sensor disconnected, clearing targets");
        self.connected = false;
        self.extractor.clear();
        self.watchdog.cancel();
        self.sweep.stop();
        self.drones.clear();
        self.images.clear();
        vec![DetectionEvent::Cleared(ClearReason::LinkLost)]
    }

    fn snapshot(&self) -> DetectionEvent {
        DetectionEvent::Batch {
            drones: self.drones.values(),
            images: self.images.values(),
        }
    }
}

impl Default for DetectionStream {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHDOG_MS, DEFAULT_TARGET_TTL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;
    use crate::io::mock::MockIo;
    use crate::model::GeoPosition;
    use crate::protocol::detection::encode_frame;
    use serde_json::json;

    fn drone_frame(uuid: &str, distance: f64) -> Vec<u8> {
        encode_frame(
            &json!({"station_droneInfo": {"trace": {
                "uav_id": "1581F45D000000", "uuid": uuid, "model_name": "Mavic 3 Pro",
                "uav_lat": 34.2215, "uav_lng": 108.8371, "distance": distance
            }}}),
            1,
        )
    }

    fn batch(events: &[DetectionEvent]) -> (Vec<DroneTarget>, Vec<ImageSignal>) {
        match events.last() {
            Some(DetectionEvent::Batch { drones, images }) => (drones.clone(), images.clone()),
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_targets_merge_by_identity() {
        let mut io = MockIo::new();
        let mut stream = DetectionStream::default();
        stream.on_connected(&mut io, "127.0.0.1:50000");

        stream.on_data(&mut io, &drone_frame("u1", 900.0));
        let events = stream.on_data(&mut io, &drone_frame("u1", 800.0));
        let (drones, _) = batch(&events);
        assert_eq!(drones.len(), 1);
        assert_eq!(drones[0].distance, 800.0);

        let events = stream.on_data(&mut io, &drone_frame("u2", 1500.0));
        let fpv = encode_frame(&json!({"fpvInfo": {"id": "FPV_5600.0", "freq": 5600.0}}), 1);
        let (drones, _) = batch(&events);
        assert_eq!(drones.len(), 2);
        let (_, images) = batch(&stream.on_data(&mut io, &fpv));
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_targets_expire_after_ttl() {
        let mut io = MockIo::new();
        let mut stream = DetectionStream::new(60_000, 4000);
        stream.on_connected(&mut io, "sensor");
        stream.on_data(&mut io, &drone_frame("u1", 900.0));

        io.advance(2000);
        stream.on_data(&mut io, &drone_frame("u2", 700.0));

        io.advance(2500);
        let (drones, _) = batch(&stream.poll(&mut io));
        assert_eq!(drones.len(), 1);
        assert_eq!(drones[0].uuid, "u2");

        io.advance(2000);
        let (drones, images) = batch(&stream.poll(&mut io));
        assert!(drones.is_empty());
        assert!(images.is_empty());
        assert!(stream.poll(&mut io).is_empty());
    }

    #[test]
    fn test_watchdog_clears_once() {
        let mut io = MockIo::new();
        let mut stream = DetectionStream::default();
        stream.on_connected(&mut io, "sensor");
        stream.on_data(&mut io, &drone_frame("u1", 900.0));

        io.advance(2999);
        assert!(stream.poll(&mut io).is_empty());
        io.advance(1);
        assert_eq!(
            stream.poll(&mut io),
            vec![DetectionEvent::Cleared(ClearReason::DataTimeout)]
        );
        io.advance(5000);
        assert!(stream.poll(&mut io).is_empty());
        assert!(stream.is_connected());
    }

    #[test]
    fn test_heartbeat_feeds_watchdog_and_position() {
        let mut io = MockIo::new();
        let mut stream = DetectionStream::default();
        stream.on_connected(&mut io, "sensor");

        io.advance(2500);
        let hb = encode_frame(
            &json!({"device_status": {"gps": 1}, "station_pos": {"lat": 34.219146, "lng": 108.835316}}),
            1,
        );
        let events = stream.on_data(&mut io, &hb);
        assert_eq!(
            events,
            vec![DetectionEvent::StationPosition(GeoPosition::new(34.219146, 108.835316))]
        );
        io.advance(2500);
        assert!(stream.poll(&mut io).is_empty());
    }

    #[test]
    fn test_disconnect_clears_and_stops_watchdog() {
        let mut io = MockIo::new();
        let mut stream = DetectionStream::default();
        stream.on_connected(&mut io, "sensor");
        stream.on_data(&mut io, &drone_frame("u1", 900.0));

        assert_eq!(
            stream.on_disconnected(&mut io),
            vec![DetectionEvent::Cleared(ClearReason::LinkLost)]
        );
        io.advance(10_000);
        assert!(stream.poll(&mut io).is_empty());
        assert!(stream.on_disconnected(&mut io).is_empty());
    }

    #[test]
    fn test_new_connection_discards_partial_document() {
        let mut io = MockIo::new();
        let mut stream = DetectionStream::default();
        stream.on_connected(&mut io, "first");
        let frame = drone_frame("u1", 900.0);
        assert!(stream.on_data(&mut io, &frame[..30]).is_empty());

        stream.on_connected(&mut io, "second");
        assert_eq!(io.logged(LogLevel::Warn).len(), 1);
        let events = stream.on_data(&mut io, &drone_frame("u9", 300.0));
        let (drones, _) = batch(&events);
        assert_eq!(drones.len(), 1);
        assert_eq!(drones[0].uuid, "u9");
    }

    #[test]
    fn test_unknown_document_is_logged_with_keys() {
        let mut io = MockIo::new();
        let mut stream = DetectionStream::default();
        stream.on_connected(&mut io, "sensor");
        let events = stream.on_data(&mut io, br#"{"weather":{"wind":3}}"#);
        assert!(events.is_empty());
        let warnings = io.logged(LogLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("weather"));
    }
}
