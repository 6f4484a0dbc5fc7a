//! Threat aggregation
//!
//! Holds the latest drone and image lists and reduces them to a single
//! [`ThreatSnapshot`]. Every update, from either source, produces a fresh
//! snapshot so an image-only change still reaches the decision engine.

use crate::detection::DetectionEvent;
use crate::model::{DroneTarget, ImageSignal, ThreatSnapshot};

/// Reported distances at or below this are placeholders, not measurements
pub const MIN_VALID_DISTANCE_M: f64 = 0.1;

/// Distance used for the decision, `INFINITY` when the report is not usable.
///
/// A drone without a GNSS fix reports `0,0` and a zero distance; treating that
/// as "on top of the station" would trigger suppression for no reason.
pub fn sanitized_distance(drone: &DroneTarget) -> f64 {
    let no_fix = drone.lat == 0.0 && drone.lng == 0.0;
    if no_fix || !drone.distance.is_finite() || drone.distance <= MIN_VALID_DISTANCE_M {
        f64::INFINITY
    } else {
        drone.distance
    }
}

/// Reduce lists to a snapshot.
pub fn evaluate(drones: &[DroneTarget], images: &[ImageSignal]) -> ThreatSnapshot {
    let hostile: Vec<&DroneTarget> = drones.iter().filter(|d| !d.whitelisted).collect();
    if hostile.is_empty() && images.is_empty() {
        return ThreatSnapshot::clear();
    }
    ThreatSnapshot {
        has_threat: true,
        min_distance: hostile
            .iter()
            .map(|d| sanitized_distance(d))
            .fold(f64::INFINITY, f64::min),
    }
}

/// What changed in an update, for the façade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Changes {
    pub drones: bool,
    pub images: bool,
}

#[derive(Debug, Default)]
pub struct ThreatAggregator {
    drones: Vec<DroneTarget>,
    images: Vec<ImageSignal>,
    snapshot: ThreatSnapshot,
}

impl ThreatAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drones(&self) -> &[DroneTarget] {
        &self.drones
    }

    pub fn images(&self) -> &[ImageSignal] {
        &self.images
    }

    pub fn snapshot(&self) -> ThreatSnapshot {
        self.snapshot
    }

    /// Non-whitelisted drones plus image signals
    pub fn alert_count(&self) -> usize {
        self.drones.iter().filter(|d| !d.whitelisted).count() + self.images.len()
    }

    /// Apply one detection event. Returns `None` for events that carry no
    /// target data (station position).
    pub fn apply(&mut self, event: &DetectionEvent) -> Option<Changes> {
        let changes = match event {
            DetectionEvent::Drones(drones) => {
                self.drones = drones.clone();
                Changes {
                    drones: true,
                    images: false,
                }
            }
            DetectionEvent::Images(images) => {
                self.images = images.clone();
                Changes {
                    drones: false,
                    images: true,
                }
            }
            DetectionEvent::Batch { drones, images } => {
                self.drones = drones.clone();
                self.images = images.clone();
                Changes {
                    drones: true,
                    images: true,
                }
            }
            DetectionEvent::Cleared(_) => {
                self.drones.clear();
                self.images.clear();
                Changes {
                    drones: true,
                    images: true,
                }
            }
            DetectionEvent::StationPosition(_) => return None,
        };
        self.snapshot = evaluate(&self.drones, &self.images);
        Some(changes)
    }

    /// Forget image signals without touching drones.
    pub fn clear_images(&mut self) {
        self.images.clear();
        self.snapshot = evaluate(&self.drones, &self.images);
    }

    pub fn clear(&mut self) {
        self.drones.clear();
        self.images.clear();
        self.snapshot = ThreatSnapshot::clear();
    }
}
