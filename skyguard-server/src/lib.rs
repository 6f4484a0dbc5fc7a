//! # SkyGuard Server
//!
//! Counter-UAV station runtime: device I/O, detection ingest and the decision
//! loop, wired together with graceful shutdown.
//!
//! ## Architecture
//!
//! The server is built on top of [`skyguard_core`] for platform-independent
//! protocol and decision handling, with [`tokio`] providing the async runtime.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    skyguard-server                      │
//! │  ┌──────────────────┐   ┌────────────────────────────┐  │
//! │  │ DetectionServer  │   │ SocketIoTransport          │  │
//! │  │ (TCP, 1 client)  │   │ (tokio-tungstenite)        │  │
//! │  └────────┬─────────┘   └─────────────┬──────────────┘  │
//! │           │   DetectionInput (mpsc)   │                 │
//! │           ▼                           ▼                 │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │ ControlLoop                                         ││
//! │  │  - DecisionEngine (spoof / relay / jammer)          ││
//! │  │  - DetectionStream or SocketIoSession               ││
//! │  │  - TokioIoProvider (UDP, TCP, reqwest)              ││
//! │  └─────────────────────────────────────────────────────┘│
//! │           ▲ StationCommand (mpsc)     │ StationEvent     │
//! │           │                           ▼ (broadcast)     │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │ Station façade: stdin commands / stdout events      ││
//! │  └─────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example: Starting the Station
//!
//! ```rust,no_run
//! use clap::Parser;
//! use skyguard_server::{Cli, Station};
//! use tokio_graceful_shutdown::Toplevel;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["skyguard-server", "--profile", "field"]);
//!     let config = args.station_config();
//!
//!     Toplevel::new(|s| async move {
//!         let station = Station::start(&s, config);
//!         let mut events = station.subscribe();
//!         // Send commands, watch events, etc.
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-p, --profile` - `simulation` (everything on localhost) or `field`
//! - `-d, --detection` - `tcp-server` or `socket-io`
//! - `--output` - write station events to stdout as JSON lines
//! - `--commands` - read station commands from stdin as JSON lines
//! - `-v` - Increase verbosity (use multiple times)

extern crate tokio;

use clap::Parser;
use serde::Serialize;
use skyguard_core::{DetectionMode, StationCommand, StationConfig, StationEvent};
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

pub mod control;
pub mod detection;
pub mod error;
pub mod network;
pub mod tokio_io;

pub use error::StationError;

use control::ControlLoop;
use detection::{DetectionServer, SocketIoTransport};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const COMMAND_QUEUE: usize = 32;
const INPUT_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 1024;

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Every device on localhost, for the hardware simulators
    #[default]
    Simulation,
    /// Deployed station network
    Field,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionTransport {
    /// The detection unit connects to us and streams JSON documents
    TcpServer,
    /// We connect to the detection unit's Socket.IO endpoint
    SocketIo,
}

impl From<DetectionTransport> for DetectionMode {
    fn from(t: DetectionTransport) -> Self {
        match t {
            DetectionTransport::TcpServer => DetectionMode::TcpServer,
            DetectionTransport::SocketIo => DetectionMode::SocketIo,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Counter-UAV station control plane")]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Configuration profile
    #[arg(short, long, default_value_t, value_enum)]
    pub profile: Profile,

    /// Spoofer command address (ip:port)
    #[arg(long)]
    pub spoof: Option<SocketAddrV4>,

    /// Jammer HTTP address (ip:port)
    #[arg(long)]
    pub jammer: Option<SocketAddrV4>,

    /// Relay bank TCP address (ip:port)
    #[arg(long)]
    pub relay: Option<SocketAddrV4>,

    /// Detection unit transport
    #[arg(short, long, value_enum)]
    pub detection: Option<DetectionTransport>,

    /// Port the detection unit connects to (tcp-server transport)
    #[arg(long)]
    pub detection_port: Option<u16>,

    /// Detection unit base URL (socket-io transport)
    #[arg(long)]
    pub detection_url: Option<String>,

    /// Spoofer shared key
    #[arg(long)]
    pub spoof_key: Option<String>,

    /// Address announced to the spoofer for its reports.
    /// Discovered from the local interfaces when not given.
    #[arg(long)]
    pub local_ip: Option<Ipv4Addr>,

    /// Stand-down delay after the last threat, in milliseconds
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Red zone radius in metres
    #[arg(long)]
    pub red_zone: Option<f64>,

    /// Write station events to stdout as JSON lines
    #[arg(long, default_value_t = false)]
    pub output: bool,

    /// Read station commands from stdin as JSON lines
    #[arg(long, default_value_t = false)]
    pub commands: bool,
}

impl Cli {
    /// Profile defaults with the command-line overrides applied.
    pub fn station_config(&self) -> StationConfig {
        let mut config = match self.profile {
            Profile::Simulation => StationConfig::simulation(),
            Profile::Field => StationConfig::field(),
        };
        if let Some(addr) = self.spoof {
            config.spoof_addr = addr;
        }
        if let Some(addr) = self.jammer {
            config.jammer_addr = addr;
        }
        if let Some(addr) = self.relay {
            config.relay_addr = addr;
        }
        if let Some(transport) = self.detection {
            config.detection_mode = transport.into();
        }
        if let Some(port) = self.detection_port {
            config.detection_port = port;
        }
        if let Some(url) = &self.detection_url {
            config.detection_url = url.clone();
        }
        if let Some(key) = &self.spoof_key {
            config.spoof_key = key.clone();
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_ms = ms;
        }
        if let Some(m) = self.red_zone {
            config.red_zone_m = m;
        }

        config.local_ip = match self.local_ip {
            Some(ip) => ip,
            None => {
                let prefix = config.spoof_subnet_prefix();
                match network::find_nic_for_device(config.spoof_addr.ip(), &prefix) {
                    Some(ip) => ip,
                    None => {
                        log::warn!(
                            "No local interface on {}x, announcing {}",
                            prefix,
                            config.local_ip
                        );
                        config.local_ip
                    }
                }
            }
        };
        config
    }
}

/// Handle to a running station: commands in, events out.
#[derive(Clone, Debug)]
pub struct Station {
    command_tx: mpsc::Sender<StationCommand>,
    event_tx: broadcast::Sender<StationEvent>,
}

impl Station {
    /// Start the control loop and the configured detection transport as
    /// subsystems of `subsystem`.
    pub fn start(subsystem: &SubsystemHandle, config: StationConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let (ws_tx, ws_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);

        log::info!(
            "Station: spoofer {}, jammer {}, relay {}, detection {:?}",
            config.spoof_addr,
            config.jammer_addr,
            config.relay_addr,
            config.detection_mode
        );

        match config.detection_mode {
            DetectionMode::TcpServer => {
                let server = DetectionServer::new(config.detection_port, input_tx);
                subsystem.start(SubsystemBuilder::new("Detection", |s| server.run(s)));
            }
            DetectionMode::SocketIo => {
                let transport = SocketIoTransport::new(input_tx, ws_rx);
                subsystem.start(SubsystemBuilder::new("SocketIo", |s| transport.run(s)));
            }
        }

        let control = ControlLoop::new(config, input_rx, command_rx, event_tx.clone(), ws_tx);
        subsystem.start(SubsystemBuilder::new("Control", |s| control.run(s)));

        Station {
            command_tx,
            event_tx,
        }
    }

    pub async fn send(&self, command: StationCommand) -> Result<(), StationError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| StationError::ControlLoopGone)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.event_tx.subscribe()
    }

    /// Write every event to stdout as one JSON line.
    pub async fn forward_output(self, subsys: SubsystemHandle) -> Result<(), StationError> {
        use std::io::Write;

        let mut rx = self.subscribe();

        loop {
            tokio::select! { biased;
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                r = rx.recv() => {
                    match r {
                        Ok(event) => {
                            let mut line = serde_json::to_string(&event)?;
                            line.push('\n');
                            std::io::stdout().write_all(line.as_bytes())?;
                        },
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("stdout fell behind, {} events skipped", n);
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Ok(());
                        }
                    };
                },
            }
        }
    }

    /// Read one JSON command per line from stdin until EOF.
    pub async fn read_commands(self, subsys: SubsystemHandle) -> Result<(), StationError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => return Ok(()),
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        log::info!("stdin closed, no more commands");
                        return Ok(());
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StationCommand>(line) {
                        Ok(command) => self.send(command).await?,
                        Err(e) => log::warn!("Ignoring command '{}': {}", line, e),
                    }
                }
            }
        }
    }
}
