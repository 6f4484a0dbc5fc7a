use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use skyguard_server::{Cli, Station, VERSION};
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .format_timestamp_millis()
        .init();

    log::info!("skyguard-server {} starting, profile {:?}", VERSION, args.profile);
    let config = args.station_config();

    Toplevel::new(move |s| async move {
        let station = Station::start(&s, config);

        if args.output {
            let station = station.clone();
            s.start(SubsystemBuilder::new("Output", |a| station.forward_output(a)));
        }
        if args.commands {
            s.start(SubsystemBuilder::new("Commands", |a| station.read_commands(a)));
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}
