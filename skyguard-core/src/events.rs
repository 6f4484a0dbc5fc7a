//! Command and event surface between the station core and its operator shell.
//!
//! The shell (UI, console, test harness) only ever sends [`StationCommand`]s in
//! and receives [`StationEvent`]s out. Both serialize as adjacently tagged JSON,
//! e.g. `{"command":"relayChannel","args":{"channel":3,"on":true}}`.

use serde::{Deserialize, Serialize};

use crate::model::{
    DroneTarget, GeoPosition, ImageSignal, JammerConfig, SpoofDirection, SystemMode,
};

/// Severity of an operator-visible log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Spoofer maintenance operations beyond the motion commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SpoofAction {
    Attenuation { channel: i32, value: f64 },
    Delay { channel: i32, nanoseconds: i64 },
    Acceleration { value: f64, heading_deg: f64 },
    Linear { speed: f64, heading_deg: f64 },
    HeartbeatCycle { seconds: i32 },
    #[serde(rename_all = "camelCase")]
    NoFlyZone {
        enabled: bool,
        lat: f64,
        lng: f64,
        radius_m: f64,
    },
    QueryNoFlyZone,
    Reboot,
    Logout,
}

/// Operator input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "camelCase")]
pub enum StationCommand {
    /// Switch mode; always stops every countermeasure first
    SetMode { auto: bool },
    ManualSpoofSwitch(bool),
    ManualCircular,
    ManualDirection(SpoofDirection),
    /// Sweep ranges for the jammer, accepted in any mode
    JammerConfig(Vec<JammerConfig>),
    /// Fixed frequencies for the jammer, accepted in any mode
    JammerFixedFreq(Vec<JammerConfig>),
    ManualJammer(bool),
    /// Accepted in any mode
    RelayChannel { channel: i32, on: bool },
    /// Accepted in any mode
    RelayAll(bool),
    Spoof(SpoofAction),
}

impl StationCommand {
    /// Commands an operator may issue while the engine runs in Auto mode.
    pub fn allowed_in_auto(&self) -> bool {
        matches!(
            self,
            StationCommand::SetMode { .. }
                | StationCommand::JammerConfig(_)
                | StationCommand::JammerFixedFreq(_)
                | StationCommand::RelayChannel { .. }
                | StationCommand::RelayAll(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            StationCommand::SetMode { .. } => "set-mode",
            StationCommand::ManualSpoofSwitch(_) => "manual-spoof-switch",
            StationCommand::ManualCircular => "manual-circular",
            StationCommand::ManualDirection(_) => "manual-direction",
            StationCommand::JammerConfig(_) => "jammer-config",
            StationCommand::JammerFixedFreq(_) => "jammer-fixed-freq",
            StationCommand::ManualJammer(_) => "manual-jammer",
            StationCommand::RelayChannel { .. } => "relay-channel",
            StationCommand::RelayAll(_) => "relay-all",
            StationCommand::Spoof(_) => "spoof",
        }
    }
}

/// Output toward the operator shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum StationEvent {
    Log { level: LogLevel, message: String },
    DroneList(Vec<DroneTarget>),
    ImageList(Vec<ImageSignal>),
    AlertCount(usize),
    SelfPosition(GeoPosition),
    ModeChanged(SystemMode),
    DefenseState { spoofing: bool, suppression: bool },
    SpoofStatus {
        working: bool,
        sys_state: Option<i64>,
        ocxo_state: Option<i64>,
    },
    RelayLink(bool),
    JammerReply {
        path: String,
        ok: bool,
        status: Option<u16>,
        body: String,
    },
}

impl StationEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        StationEvent::Log {
            level,
            message: message.into(),
        }
    }
}
