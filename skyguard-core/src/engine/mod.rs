//! DecisionEngine - threat response and operator command handling
//!
//! The engine is the single owner of the three device controllers, the threat
//! aggregator and the decision state. Detection events and operator commands go
//! in; [`StationEvent`]s for the operator shell come out.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ DecisionEngine                                              │
//! │  DetectionEvent ──▶ ThreatAggregator ──▶ decide()           │
//! │  StationCommand ───────────────────────▶ handle_command()   │
//! │                                            │                │
//! │              ┌─────────────────┬───────────┴───────┐        │
//! │        SpoofController  RelayController  JammerController   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Automatic mode
//!
//! - threat seen, not spoofing: set position, RF on, circular track
//! - threat within the red zone while spoofing: all relays on
//! - threat back outside the red zone: relays off, spoofing continues
//! - no threat while anything is active: arm the debounce timer once; if it
//!   expires in Auto mode everything stops. A threat in between cancels it.
//!
//! Changing mode always stops everything first, whatever the previous state.

mod state;

pub use state::{DecisionState, DefenseStage};

use crate::aggregator::{Changes, ThreatAggregator};
use crate::config::StationConfig;
use crate::controllers::{ControllerEvent, JammerController, RelayController, SpoofController};
use crate::detection::DetectionEvent;
use crate::events::{LogLevel, SpoofAction, StationCommand, StationEvent};
use crate::io::{IoProvider, IoProviderExt};
use crate::model::{GeoPosition, SpoofDirection, SystemMode};
use crate::timer::OneShotTimer;

pub struct DecisionEngine {
    config: StationConfig,
    state: DecisionState,
    debounce: OneShotTimer,
    aggregator: ThreatAggregator,
    spoof: SpoofController,
    relay: RelayController,
    jammer: JammerController,
}

impl DecisionEngine {
    pub fn new(config: StationConfig) -> Self {
        let spoof = SpoofController::new(
            config.spoof_addr,
            &config.spoof_key,
            config.spoof_report_port,
            config.local_ip,
        );
        let relay = RelayController::new(config.relay_addr);
        let jammer = JammerController::new(config.jammer_addr);
        Self {
            config,
            state: DecisionState::default(),
            debounce: OneShotTimer::new(),
            aggregator: ThreatAggregator::new(),
            spoof,
            relay,
            jammer,
        }
    }

    pub fn state(&self) -> &DecisionState {
        &self.state
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &ThreatAggregator {
        &self.aggregator
    }

    /// Bring up the device links. `wall_time` (`YYYY-MM-DD HH:MM:SS`) is
    /// pushed to the spoofer clock.
    pub fn start<I: IoProvider>(&mut self, io: &mut I, wall_time: &str) -> Vec<StationEvent> {
        let mut events = Vec::new();
        self.spoof.start(io, wall_time);
        self.relay.connect(io);
        self.jammer.set_target(io, self.config.jammer_addr);
        events.push(StationEvent::ModeChanged(self.state.mode));
        events.push(self.defense_event());
        self.collect(&mut events);
        events
    }

    /// Drive controllers and the debounce timer.
    pub fn poll<I: IoProvider>(&mut self, io: &mut I) -> Vec<StationEvent> {
        let mut events = Vec::new();
        self.spoof.poll(io);
        self.relay.poll(io);
        self.jammer.poll(io);

        if self.debounce.expire(io.current_time_ms()) {
            self.state.debounce_running = false;
            if self.state.mode == SystemMode::Auto {
                self.note(
                    io,
                    &mut events,
                    LogLevel::Info,
                    format!(
                        "No threat for {} ms, standing down",
                        self.config.debounce_ms
                    ),
                );
                self.stop_all(io, &mut events);
            }
        }

        self.collect(&mut events);
        events
    }

    /// Turn everything off and close the device links.
    pub fn shutdown<I: IoProvider>(&mut self, io: &mut I) -> Vec<StationEvent> {
        let mut events = Vec::new();
        self.stop_all(io, &mut events);
        self.spoof.shutdown(io);
        self.relay.shutdown(io);
        self.collect(&mut events);
        events
    }

    // -------------------------------------------------------------------------
    // Detection
    // -------------------------------------------------------------------------

    pub fn handle_detection<I: IoProvider>(
        &mut self,
        io: &mut I,
        event: DetectionEvent,
    ) -> Vec<StationEvent> {
        let mut events = Vec::new();

        if let DetectionEvent::StationPosition(pos) = event {
            self.update_base(&mut events, pos);
            return events;
        }
        if let DetectionEvent::Cleared(reason) = event {
            self.note(
                io,
                &mut events,
                LogLevel::Warn,
                format!("Detection cleared: {}", reason),
            );
        }

        if let Some(changes) = self.aggregator.apply(&event) {
            self.publish_lists(&mut events, changes);
            self.decide(io, &mut events);
        }
        self.collect(&mut events);
        events
    }

    fn decide<I: IoProvider>(&mut self, io: &mut I, events: &mut Vec<StationEvent>) {
        if self.state.mode != SystemMode::Auto {
            return;
        }
        let snapshot = self.aggregator.snapshot();
        let before = self.state.stage();

        if !snapshot.has_threat {
            if self.state.anything_active() && !self.debounce.is_armed() {
                self.debounce
                    .arm(io.current_time_ms(), self.config.debounce_ms);
                self.state.debounce_running = true;
                self.note(
                    io,
                    events,
                    LogLevel::Info,
                    format!(
                        "Threat gone, standing down in {} ms unless it returns",
                        self.config.debounce_ms
                    ),
                );
            }
            return;
        }

        if self.debounce.is_armed() {
            self.debounce.cancel();
            self.state.debounce_running = false;
            io.debug("Threat returned, stand-down cancelled");
        }

        if !self.state.spoofing_active {
            let distance = if snapshot.min_distance.is_finite() {
                format!("{:.0} m", snapshot.min_distance)
            } else {
                "unknown distance".to_string()
            };
            self.note(
                io,
                events,
                LogLevel::Warn,
                format!("Threat detected at {}, starting spoofing", distance),
            );
            let base = self.base_position();
            let circle = self.config.auto_circle;
            self.spoof
                .set_position(io, base.lng, base.lat, self.config.base_alt);
            self.spoof.set_switch(io, true);
            self.spoof
                .start_circular(io, circle.radius_m, circle.cycle_s);
            self.state.spoofing_active = true;
        }

        if snapshot.within(self.config.red_zone_m) {
            if !self.state.suppression_active {
                self.note(
                    io,
                    events,
                    LogLevel::Warn,
                    format!(
                        "Threat inside red zone ({:.0} m <= {} m), suppression on",
                        snapshot.min_distance, self.config.red_zone_m
                    ),
                );
                self.relay.set_all(io, true);
                self.state.suppression_active = true;
            }
        } else if self.state.suppression_active {
            self.note(
                io,
                events,
                LogLevel::Info,
                "Threat left red zone, suppression off".to_string(),
            );
            self.relay.set_all(io, false);
            self.state.suppression_active = false;
        }

        if self.state.stage() != before {
            events.push(self.defense_event());
        }
    }

    // -------------------------------------------------------------------------
    // Operator Commands
    // -------------------------------------------------------------------------

    pub fn handle_command<I: IoProvider>(
        &mut self,
        io: &mut I,
        command: StationCommand,
    ) -> Vec<StationEvent> {
        let mut events = Vec::new();

        if self.state.mode == SystemMode::Auto && !command.allowed_in_auto() {
            self.note(
                io,
                &mut events,
                LogLevel::Warn,
                format!("'{}' rejected: switch to Manual mode first", command.name()),
            );
            return events;
        }

        let before = self.state.stage();
        match command {
            StationCommand::SetMode { auto } => self.set_mode(io, &mut events, auto),
            StationCommand::ManualSpoofSwitch(on) => {
                self.spoof.set_switch(io, on);
                self.state.spoofing_active = on;
            }
            StationCommand::ManualCircular => {
                let base = self.base_position();
                let circle = self.config.manual_circle;
                self.spoof
                    .set_position(io, base.lng, base.lat, self.config.base_alt);
                self.spoof.set_switch(io, true);
                self.spoof
                    .start_circular(io, circle.radius_m, circle.cycle_s);
                self.state.spoofing_active = true;
            }
            StationCommand::ManualDirection(direction) => {
                self.start_directional(io, direction);
            }
            StationCommand::JammerConfig(configs) => self.jammer.set_write_freq(io, &configs),
            StationCommand::JammerFixedFreq(configs) => self.jammer.set_fixed_freq(io, &configs),
            StationCommand::ManualJammer(on) => self.jammer.set_jamming(io, on),
            StationCommand::RelayChannel { channel, on } => self.relay.set_channel(io, channel, on),
            StationCommand::RelayAll(on) => self.relay.set_all(io, on),
            StationCommand::Spoof(action) => self.spoof_action(io, action),
        }

        if self.state.stage() != before {
            events.push(self.defense_event());
        }
        self.collect(&mut events);
        events
    }

    fn set_mode<I: IoProvider>(&mut self, io: &mut I, events: &mut Vec<StationEvent>, auto: bool) {
        let mode = SystemMode::from_auto(auto);
        self.stop_all(io, events);
        self.state.mode = mode;
        self.note(io, events, LogLevel::Info, format!("Mode set to {}", mode));
        events.push(StationEvent::ModeChanged(mode));
    }

    fn start_directional<I: IoProvider>(&mut self, io: &mut I, direction: SpoofDirection) {
        let base = self.base_position();
        self.spoof
            .set_position(io, base.lng, base.lat, self.config.base_alt);
        self.spoof.set_switch(io, true);
        self.spoof.start_linear(
            io,
            self.config.direction_speed,
            i32::from(direction.heading_deg()),
        );
        self.state.spoofing_active = true;
    }

    fn spoof_action<I: IoProvider>(&mut self, io: &mut I, action: SpoofAction) {
        match action {
            SpoofAction::Attenuation { channel, value } => {
                self.spoof.set_attenuation(io, channel, value)
            }
            SpoofAction::Delay {
                channel,
                nanoseconds,
            } => self.spoof.set_delay(io, channel, nanoseconds),
            SpoofAction::Acceleration { value, heading_deg } => {
                self.spoof.set_acceleration(io, value, heading_deg)
            }
            SpoofAction::Linear { speed, heading_deg } => {
                self.spoof
                    .start_linear(io, speed, heading_deg.round() as i32)
            }
            SpoofAction::HeartbeatCycle { seconds } => self.spoof.set_heartbeat_cycle(io, seconds),
            SpoofAction::NoFlyZone {
                enabled,
                lat,
                lng,
                radius_m,
            } => self.spoof.set_no_fly_zone(io, enabled, lng, lat, radius_m),
            SpoofAction::QueryNoFlyZone => self.spoof.query_no_fly_zone(io),
            SpoofAction::Reboot => self.spoof.reboot(io),
            SpoofAction::Logout => self.spoof.logout(io),
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Spoof off, jammer off, relays off, flags and timer reset.
    fn stop_all<I: IoProvider>(&mut self, io: &mut I, events: &mut Vec<StationEvent>) {
        let before = self.state.stage();
        self.debounce.cancel();
        self.state.debounce_running = false;

        self.spoof.set_switch(io, false);
        self.jammer.set_jamming(io, false);
        self.relay.set_all(io, false);
        self.state.spoofing_active = false;
        self.state.suppression_active = false;

        if !self.aggregator.images().is_empty() {
            self.aggregator.clear_images();
            self.publish_lists(
                events,
                Changes {
                    drones: false,
                    images: true,
                },
            );
        }
        if self.state.stage() != before {
            events.push(self.defense_event());
        }
    }

    fn base_position(&self) -> GeoPosition {
        self.state.last_base.unwrap_or(self.config.base_position)
    }

    fn update_base(&mut self, events: &mut Vec<StationEvent>, pos: GeoPosition) {
        if pos.is_valid_fix() {
            self.state.last_base = Some(pos);
            events.push(StationEvent::SelfPosition(pos));
        }
    }

    fn publish_lists(&self, events: &mut Vec<StationEvent>, changes: Changes) {
        if changes.drones {
            events.push(StationEvent::DroneList(self.aggregator.drones().to_vec()));
        }
        if changes.images {
            events.push(StationEvent::ImageList(self.aggregator.images().to_vec()));
        }
        events.push(StationEvent::AlertCount(self.aggregator.alert_count()));
    }

    fn defense_event(&self) -> StationEvent {
        StationEvent::DefenseState {
            spoofing: self.state.spoofing_active,
            suppression: self.state.suppression_active,
        }
    }

    fn note<I: IoProvider>(
        &self,
        io: &I,
        events: &mut Vec<StationEvent>,
        level: LogLevel,
        message: String,
    ) {
        io.log(level, &message);
        events.push(StationEvent::Log { level, message });
    }

    /// Move controller events into the outgoing list.
    fn collect(&mut self, events: &mut Vec<StationEvent>) {
        let mut pending = self.spoof.take_events();
        pending.extend(self.relay.take_events());
        pending.extend(self.jammer.take_events());

        for event in pending {
            match event {
                ControllerEvent::Log { level, message } => {
                    events.push(StationEvent::Log { level, message })
                }
                ControllerEvent::SpoofStatus(status) => events.push(StationEvent::SpoofStatus {
                    working: status.working,
                    sys_state: status.sys_state,
                    ocxo_state: status.ocxo_state,
                }),
                ControllerEvent::SelfPosition(pos) => self.update_base(events, pos),
                ControllerEvent::RelayLink(up) => events.push(StationEvent::RelayLink(up)),
                ControllerEvent::JammerReply {
                    path,
                    ok,
                    status,
                    body,
                } => events.push(StationEvent::JammerReply {
                    path,
                    ok,
                    status,
                    body,
                }),
            }
        }
    }
}
