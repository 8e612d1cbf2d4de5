use anyhow::Result;
use clap::{Parser, Subcommand};
use threat_vision::vision::{self, ServeArgs, SnapshotArgs, SnapshotConfig, VisionConfig, telemetry};

#[derive(Debug, Parser)]
#[command(name = "threat-vision", version, about = "Live weapon, mask and full-body detection over MJPEG")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the detection console and MJPEG feeds.
    Serve(ServeArgs),
    /// Annotate a single frame and write it as a JPEG.
    Snapshot(SnapshotArgs),
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => {
            let config = VisionConfig::try_from(args)?;
            let _telemetry = telemetry::init_tracing(&config.telemetry)?;
            vision::run(config)
        }
        Command::Snapshot(args) => {
            let config = SnapshotConfig::try_from(args)?;
            let _telemetry = telemetry::init_tracing(&config.telemetry)?;
            vision::run_snapshot(config)
        }
    }
}
