//! Kraken live CLI
//!
//! Command-line live view of a Kraken cluster.
//!
//! # Commands
//!
//! - `watch` - Follow the cluster and print every snapshot
//! - `power` - Power a node on or off

mod commands;
mod transport;

use clap::{Parser, Subcommand, ValueEnum};
use kraken_live::{Controller, HttpController, PowerAction, PushConnector, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transport::{ReqwestClient, TungsteniteConnector};

/// Live view and power control for Kraken clusters.
#[derive(Parser)]
#[command(name = "kraken-live")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Controller address (host:port)
    #[arg(global = true, short, long, default_value = "192.168.57.10:3141")]
    addr: String,

    /// Per-request HTTP timeout in seconds
    #[arg(global = true, long, default_value = "5")]
    timeout: u64,

    /// Refuse unencrypted push sockets
    #[arg(global = true, long)]
    require_tls: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Websocket,
    Poll,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Websocket => Transport::WebSocket,
            TransportArg::Poll => Transport::Poll,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PowerArg {
    On,
    Off,
}

impl From<PowerArg> for PowerAction {
    fn from(arg: PowerArg) -> Self {
        match arg {
            PowerArg::On => PowerAction::On,
            PowerArg::Off => PowerAction::Off,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the cluster and print every snapshot
    Watch {
        /// Refresh interval in seconds
        #[arg(short, long, default_value = "0.4")]
        refresh: f64,

        /// Preferred transport
        #[arg(short, long, value_enum, default_value = "websocket")]
        transport: TransportArg,

        /// Node whose topology graph is followed
        #[arg(long)]
        focus: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Exit after this many snapshots
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Power a node on or off
    Power {
        /// Requested action
        #[arg(value_enum)]
        action: PowerArg,

        /// Target node id
        node_id: String,

        /// Seconds to wait for the controller to reject the write
        #[arg(long, default_value = "2")]
        settle: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // The blocking client owns its own runtime; keep it outside tokio's.
    let http = ReqwestClient::new(Duration::from_secs(cli.timeout))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let controller: Arc<dyn Controller> = Arc::new(HttpController::new(http.clone()));
    let connector: Arc<dyn PushConnector> = Arc::new(
        TungsteniteConnector::new(runtime.handle().clone()).with_require_tls(cli.require_tls),
    );

    let result = match cli.command {
        Commands::Watch {
            refresh,
            transport,
            focus,
            format,
            count,
        } => {
            let options = commands::watch::WatchOptions {
                address: cli.addr,
                refresh_secs: refresh,
                transport: transport.into(),
                focus,
                format,
                count,
            };
            runtime.block_on(commands::watch::run(controller, connector, options))
        }
        Commands::Power {
            action,
            node_id,
            settle,
        } => runtime.block_on(commands::power::run(
            controller,
            connector,
            cli.addr,
            node_id,
            action.into(),
            Duration::from_secs(settle),
        )),
    };

    drop(runtime);
    drop(http);
    result
}
