//! Detection and operator data model.
//!
//! These types flow from the detection codecs through the aggregator and the
//! decision engine out to the façade. They serialize with camelCase keys so the
//! shell can forward them to a UI unchanged.

use serde::{Deserialize, Serialize};

/// A geographic fix in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPosition {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Devices report `0.0` (or tiny noise) until they have a GNSS fix.
    ///
    /// The cut-off is the one the spoofer firmware applies: anything within 1°
    /// of the equator or the prime meridian counts as "no fix". That rejects
    /// real positions there too, which is accepted for the deployment regions.
    pub fn is_valid_fix(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite() && self.lat.abs() > 1.0 && self.lng.abs() > 1.0
    }
}

/// One detected UAV.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneTarget {
    /// Serial number reported by the sensor
    pub id: String,
    pub model: String,
    /// Reported distance from the station in meters, `0` when unknown
    pub distance: f64,
    /// True bearing from the station, degrees clockwise from north
    pub azimuth: f64,
    pub lat: f64,
    pub lng: f64,
    pub height: f64,
    /// Control link frequency in MHz
    pub freq: f64,
    pub velocity: String,
    pub pilot_lat: f64,
    pub pilot_lng: f64,
    pub pilot_distance: f64,
    pub whitelisted: bool,
    /// Tracking id assigned by the sensor, may be empty
    pub uuid: String,
}

impl DroneTarget {
    /// Identity used to merge repeated reports of the same drone.
    pub fn key(&self) -> &str {
        if self.uuid.is_empty() {
            &self.id
        } else {
            &self.uuid
        }
    }
}

/// Classification of an image/video emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Drone data link or spectrum hit
    #[default]
    Spectrum,
    /// Analog or digital FPV video
    Fpv,
}

impl SignalKind {
    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::Spectrum => "Spectrum",
            SignalKind::Fpv => "FPV",
        }
    }
}

/// A detected video/FPV/spectrum emitter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSignal {
    pub id: String,
    /// MHz
    pub freq: f64,
    pub amplitude: f64,
    pub kind: SignalKind,
    /// Sensor timestamp in ms when supplied, otherwise the local receive time
    pub timestamp: u64,
}

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMode {
    #[default]
    Manual,
    Auto,
}

impl SystemMode {
    pub fn from_auto(auto: bool) -> Self {
        if auto {
            SystemMode::Auto
        } else {
            SystemMode::Manual
        }
    }
}

impl std::fmt::Display for SystemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemMode::Manual => write!(f, "Manual"),
            SystemMode::Auto => write!(f, "Auto"),
        }
    }
}

/// Compass direction for manual directional deterrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpoofDirection {
    North,
    East,
    South,
    West,
}

/// Heading sent to the spoofer for each direction, degrees clockwise from north.
pub const DIRECTION_HEADINGS: [(SpoofDirection, u16); 4] = [
    (SpoofDirection::North, 0),
    (SpoofDirection::East, 90),
    (SpoofDirection::South, 180),
    (SpoofDirection::West, 270),
];

impl SpoofDirection {
    pub fn heading_deg(&self) -> u16 {
        DIRECTION_HEADINGS
            .iter()
            .find(|(d, _)| d == self)
            .map(|(_, h)| *h)
            .unwrap_or(0)
    }
}

/// One frequency band for the jammer.
///
/// Forwarded verbatim into the jammer's JSON arrays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JammerConfig {
    pub freq_type: i32,
    pub start_freq: f64,
    pub end_freq: f64,
}

/// Aggregated decision input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreatSnapshot {
    pub has_threat: bool,
    /// Meters, `f64::INFINITY` when no located drone contributes
    pub min_distance: f64,
}

impl ThreatSnapshot {
    pub const fn clear() -> Self {
        Self {
            has_threat: false,
            min_distance: f64::INFINITY,
        }
    }

    pub fn within(&self, threshold_m: f64) -> bool {
        self.has_threat && self.min_distance <= threshold_m
    }
}

impl Default for ThreatSnapshot {
    fn default() -> Self {
        Self::clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_table() {
        assert_eq!(SpoofDirection::North.heading_deg(), 0);
        assert_eq!(SpoofDirection::East.heading_deg(), 90);
        assert_eq!(SpoofDirection::South.heading_deg(), 180);
        assert_eq!(SpoofDirection::West.heading_deg(), 270);
    }

    #[test]
    fn test_fix_validity() {
        assert!(GeoPosition::new(31.2304, 121.4737).is_valid_fix());
        assert!(GeoPosition::new(-33.86, 151.2).is_valid_fix());
        assert!(!GeoPosition::new(0.0, 0.0).is_valid_fix());
        assert!(!GeoPosition::new(0.3, 121.0).is_valid_fix());
        // Greenwich: a real fix, still rejected
        assert!(!GeoPosition::new(51.48, -0.5).is_valid_fix());
        assert!(!GeoPosition::new(f64::NAN, 121.0).is_valid_fix());
    }

    #[test]
    fn test_drone_key_prefers_uuid() {
        let mut drone = DroneTarget {
            id: "1581F45D000000".into(),
            ..Default::default()
        };
        assert_eq!(drone.key(), "1581F45D000000");
        drone.uuid = "uuid-sim-8888".into();
        assert_eq!(drone.key(), "uuid-sim-8888");
    }

    #[test]
    fn test_snapshot_red_zone() {
        let far = ThreatSnapshot {
            has_threat: true,
            min_distance: 1500.0,
        };
        let near = ThreatSnapshot {
            has_threat: true,
            min_distance: 800.0,
        };
        assert!(!far.within(1000.0));
        assert!(near.within(1000.0));
        assert!(!ThreatSnapshot::clear().within(1000.0));
    }

    #[test]
    fn test_jammer_config_json_keys() {
        let cfg = JammerConfig {
            freq_type: 2,
            start_freq: 2400.0,
            end_freq: 2483.5,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(json, r#"{"freqType":2,"startFreq":2400.0,"endFreq":2483.5}"#);
    }
}
