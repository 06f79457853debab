use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

use session_grid::daemon::Mode;
use session_grid::{Daemon, GridConfig};

/// Grid - distributed browser session scheduler
#[derive(Parser)]
#[command(name = "grid", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "GRID_PORT")]
    port: Option<u16>,

    /// Hub to register with (node mode)
    #[arg(long = "hub", env = "GRID_HUB_URL")]
    hub_url: Option<Url>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Router, distributor and a local node in one process (default)
    Standalone,
    /// Router and distributor; nodes register over HTTP
    Hub,
    /// A single node registering with a hub
    Node,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,session_grid=info",
        1 => "info,session_grid=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mode = match cli.command {
        None | Some(Command::Standalone) => Mode::Standalone,
        Some(Command::Hub) => Mode::Hub,
        Some(Command::Node) => Mode::Node,
    };

    let mut config = GridConfig::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(hub) = cli.hub_url {
        config.hub_url = Some(hub);
    }
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config, mode)?;
    daemon.run().await?;

    tracing::info!("session grid stopped");
    Ok(())
}
