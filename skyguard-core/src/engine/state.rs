//! Decision bookkeeping

use serde::{Deserialize, Serialize};

use crate::model::{GeoPosition, SystemMode};

/// Escalation level of the automatic defense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DefenseStage {
    #[default]
    Idle,
    Spoofing,
    /// Red zone: relay suppression on top of spoofing
    SpoofingAndSuppressing,
}

/// Engine state. Only [`DecisionEngine`](super::DecisionEngine) writes it.
///
/// `suppression_active` implies `spoofing_active`, and the debounce timer only
/// runs while something is active and no threat is seen.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionState {
    pub mode: SystemMode,
    pub spoofing_active: bool,
    pub suppression_active: bool,
    pub debounce_running: bool,
    /// Last station fix from the sensor or the spoofer
    pub last_base: Option<GeoPosition>,
}

impl DecisionState {
    pub fn stage(&self) -> DefenseStage {
        match (self.spoofing_active, self.suppression_active) {
            (true, true) => DefenseStage::SpoofingAndSuppressing,
            (true, false) => DefenseStage::Spoofing,
            _ => DefenseStage::Idle,
        }
    }

    pub fn anything_active(&self) -> bool {
        self.spoofing_active || self.suppression_active
    }
}
