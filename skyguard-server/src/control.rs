//! Control loop subsystem.
//!
//! Sole owner of the [`DecisionEngine`] and the detection state machine. Every
//! detection input, operator command and poll tick is handled to completion
//! here before the next one is taken, so a detection batch is fully aggregated
//! and its decision fully issued before anything else is looked at.

use std::time::Duration;

use skyguard_core::detection::{DetectionEvent, DetectionStream, SessionOutput, SocketIoSession};
use skyguard_core::{DecisionEngine, DetectionMode, StationCommand, StationConfig, StationEvent};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::detection::{DetectionInput, WsCommand};
use crate::error::StationError;
use crate::tokio_io::TokioIoProvider;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Time given to the last HTTP requests after the stop sequence
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

enum DetectionFront {
    Tcp {
        stream: DetectionStream,
        conn: Option<u64>,
    },
    SocketIo {
        session: SocketIoSession,
        ws_tx: mpsc::Sender<WsCommand>,
    },
}

/// What a detection state machine handed back
enum Step {
    Detections(Vec<DetectionEvent>),
    Session(SessionOutput),
}

pub struct ControlLoop {
    engine: DecisionEngine,
    io: TokioIoProvider,
    front: DetectionFront,
    input_rx: mpsc::Receiver<DetectionInput>,
    command_rx: mpsc::Receiver<StationCommand>,
    event_tx: broadcast::Sender<StationEvent>,
}

impl ControlLoop {
    /// `ws_tx` is only used in Socket.IO mode.
    pub fn new(
        config: StationConfig,
        input_rx: mpsc::Receiver<DetectionInput>,
        command_rx: mpsc::Receiver<StationCommand>,
        event_tx: broadcast::Sender<StationEvent>,
        ws_tx: mpsc::Sender<WsCommand>,
    ) -> Self {
        let front = match config.detection_mode {
            DetectionMode::TcpServer => DetectionFront::Tcp {
                stream: DetectionStream::new(config.watchdog_ms, config.target_ttl_ms),
                conn: None,
            },
            DetectionMode::SocketIo => DetectionFront::SocketIo {
                session: SocketIoSession::new(
                    &config.detection_url,
                    config.watchdog_ms,
                    config.reconnect_ms,
                ),
                ws_tx,
            },
        };
        Self {
            engine: DecisionEngine::new(config),
            io: TokioIoProvider::new(),
            front,
            input_rx,
            command_rx,
            event_tx,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), StationError> {
        log::info!("Control loop starting");
        let events = self.engine.start(&mut self.io, &wall_time());
        self.publish(events);

        if let DetectionFront::SocketIo { session, .. } = &mut self.front {
            let output = session.start(&mut self.io);
            self.finish(Step::Session(output));
        }

        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;
        let mut inputs_open = true;

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::info!("Control loop: shutdown requested");
                    break;
                }
                command = self.command_rx.recv(), if commands_open => match command {
                    Some(command) => {
                        log::debug!("Command {:?}", command);
                        let events = self.engine.handle_command(&mut self.io, command);
                        self.publish(events);
                    }
                    None => commands_open = false,
                },
                input = self.input_rx.recv(), if inputs_open => match input {
                    Some(input) => self.handle_input(input),
                    None => {
                        log::warn!("Detection transport stopped");
                        inputs_open = false;
                    }
                },
                _ = ticker.tick() => self.tick(),
            }
        }

        self.shutdown().await;
        log::info!("Control loop finished");
        Ok(())
    }

    fn tick(&mut self) {
        let step = match &mut self.front {
            DetectionFront::Tcp { stream, .. } => Step::Detections(stream.poll(&mut self.io)),
            DetectionFront::SocketIo { session, .. } => Step::Session(session.poll(&mut self.io)),
        };
        self.finish(step);

        let events = self.engine.poll(&mut self.io);
        self.publish(events);
    }

    fn handle_input(&mut self, input: DetectionInput) {
        let io = &mut self.io;
        let step = match (&mut self.front, input) {
            (DetectionFront::Tcp { stream, conn }, DetectionInput::TcpConnected { conn: id, peer }) => {
                *conn = Some(id);
                stream.on_connected(io, &peer.to_string());
                Step::Detections(Vec::new())
            }
            (DetectionFront::Tcp { stream, conn }, DetectionInput::TcpData { conn: id, data }) => {
                if *conn != Some(id) {
                    log::trace!("Dropping {} bytes from stale connection {}", data.len(), id);
                    return;
                }
                Step::Detections(stream.on_data(io, &data))
            }
            (DetectionFront::Tcp { stream, conn }, DetectionInput::TcpClosed { conn: id }) => {
                if *conn != Some(id) {
                    return;
                }
                *conn = None;
                Step::Detections(stream.on_disconnected(io))
            }
            (DetectionFront::SocketIo { session, .. }, DetectionInput::WsOpened) => {
                session.on_open(io);
                Step::Detections(Vec::new())
            }
            (DetectionFront::SocketIo { session, .. }, DetectionInput::WsText(text)) => {
                Step::Session(session.on_frame(io, &text))
            }
            (DetectionFront::SocketIo { session, .. }, DetectionInput::WsClosed(reason)) => {
                Step::Session(session.on_closed(io, &reason))
            }
            (_, other) => {
                log::debug!("Ignoring {:?} for this detection mode", other);
                return;
            }
        };
        self.finish(step);
    }

    fn finish(&mut self, step: Step) {
        let detections = match step {
            Step::Detections(detections) => detections,
            Step::Session(output) => self.apply_session(output),
        };
        self.feed(detections);
    }

    /// Forward session requests to the WebSocket task; returns its detections.
    fn apply_session(&self, output: SessionOutput) -> Vec<DetectionEvent> {
        let DetectionFront::SocketIo { session, ws_tx } = &self.front else {
            return output.events;
        };
        if output.connect {
            send_ws(ws_tx, WsCommand::Connect(session.url().to_string()));
        }
        for reply in output.replies {
            send_ws(ws_tx, WsCommand::Send(reply));
        }
        output.events
    }

    fn feed(&mut self, detections: Vec<DetectionEvent>) {
        for detection in detections {
            let events = self.engine.handle_detection(&mut self.io, detection);
            self.publish(events);
        }
    }

    fn publish(&self, events: Vec<StationEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.event_tx.send(event);
        }
    }

    async fn shutdown(&mut self) {
        if let DetectionFront::SocketIo { session, ws_tx } = &mut self.front {
            session.shutdown(&mut self.io);
            send_ws(ws_tx, WsCommand::Close);
        }
        let events = self.engine.shutdown(&mut self.io);
        self.publish(events);

        tokio::time::sleep(SHUTDOWN_GRACE).await;
        let events = self.engine.poll(&mut self.io);
        self.publish(events);
    }
}

fn send_ws(ws_tx: &mpsc::Sender<WsCommand>, command: WsCommand) {
    if let Err(e) = ws_tx.try_send(command) {
        log::warn!("WebSocket task not accepting commands: {}", e);
    }
}

/// Local time in the spoofer's `YYYY-MM-DD HH:MM:SS` format
pub fn wall_time() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyguard_core::events::LogLevel;
    use skyguard_core::protocol::detection::encode_frame;
    use std::net::SocketAddr;

    fn control(mode: DetectionMode) -> (ControlLoop, broadcast::Receiver<StationEvent>, mpsc::Receiver<WsCommand>) {
        let mut config = StationConfig::simulation();
        config.detection_mode = mode;
        config.detection_url = "http://127.0.0.1:1".to_string();
        let (_input_tx, input_rx) = mpsc::channel(8);
        let (_command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = broadcast::channel(256);
        let (ws_tx, ws_rx) = mpsc::channel(8);
        let control = ControlLoop::new(config, input_rx, command_rx, event_tx, ws_tx);
        (control, event_rx, ws_rx)
    }

    fn drain(rx: &mut broadcast::Receiver<StationEvent>) -> Vec<StationEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[test]
    fn test_wall_time_format() {
        let t = wall_time();
        assert_eq!(t.len(), 19);
        assert_eq!(&t[4..5], "-");
        assert_eq!(&t[10..11], " ");
    }

    #[tokio::test]
    async fn test_tcp_documents_reach_the_engine() {
        let (mut control, mut events, _ws) = control(DetectionMode::TcpServer);
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        control.handle_input(DetectionInput::TcpConnected { conn: 1, peer });

        let doc = serde_json::json!({"station_pos": {"lat": 34.219146, "lng": 108.835316}});
        let data = encode_frame(&doc, 1);
        control.handle_input(DetectionInput::TcpData { conn: 1, data: data.clone() });
        // Stale connection ids are dropped
        control.handle_input(DetectionInput::TcpData { conn: 7, data });

        let positions: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, StationEvent::SelfPosition(_)))
            .collect();
        assert_eq!(positions.len(), 1);
    }

    #[tokio::test]
    async fn test_tcp_close_clears_lists() {
        let (mut control, mut events, _ws) = control(DetectionMode::TcpServer);
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        control.handle_input(DetectionInput::TcpConnected { conn: 3, peer });
        control.handle_input(DetectionInput::TcpClosed { conn: 3 });

        let events = drain(&mut events);
        assert!(events.contains(&StationEvent::DroneList(vec![])));
        assert!(events.contains(&StationEvent::AlertCount(0)));
    }

    #[tokio::test]
    async fn test_socketio_open_frame_is_answered() {
        let (mut control, _events, mut ws) = control(DetectionMode::SocketIo);
        control.handle_input(DetectionInput::WsOpened);
        control.handle_input(DetectionInput::WsText(
            r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#.to_string(),
        ));
        assert_eq!(ws.try_recv().unwrap(), WsCommand::Send("40".to_string()));

        control.handle_input(DetectionInput::WsText("2".to_string()));
        assert_eq!(ws.try_recv().unwrap(), WsCommand::Send("3".to_string()));
    }

    #[tokio::test]
    async fn test_commands_are_gated_by_mode() {
        let (mut control, mut events, _ws) = control(DetectionMode::TcpServer);
        let out = control
            .engine
            .handle_command(&mut control.io, StationCommand::SetMode { auto: true });
        control.publish(out);
        let out = control
            .engine
            .handle_command(&mut control.io, StationCommand::ManualCircular);
        control.publish(out);

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            StationEvent::Log {
                level: LogLevel::Warn,
                ..
            }
        )));
    }
}
