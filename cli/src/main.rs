//! OpenClipboard CLI - LAN clipboard sync between trusted devices.

mod commands;
mod paths;
mod process;
mod ui;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "openclipboard")]
#[command(about = "LAN clipboard sync between trusted devices", long_about = None)]
struct Cli {
    /// Device name to advertise
    #[arg(short, long, default_value_t = default_device_name())]
    name: String,

    /// Identity file (defaults to ~/.openclipboard/identity.json)
    #[arg(long)]
    identity: Option<std::path::PathBuf>,

    /// Trust store file (defaults to ~/.openclipboard/trust.json)
    #[arg(long)]
    trust: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "openclipboard-device".to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// Start the clipboard mesh (default)
    Run {
        /// Listening port
        #[arg(short, long, default_value_t = 18455)]
        port: u16,
        /// Open the QR auto-trust window and display a pairing code
        #[arg(long)]
        pair: bool,
    },
    /// Show device info
    Info,
    /// Explicit two-string pairing
    Pair {
        #[command(subcommand)]
        flow: commands::PairFlow,
    },
    /// Send one text to a trusted peer and exit
    Send {
        /// Peer address, e.g. 192.168.1.20:18455
        addr: String,
        /// Text to send
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("openclipboard=info".parse()?)
                .add_directive("openclipboard_core=info".parse()?)
                .add_directive("mdns_sd=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let paths = paths::StoragePaths::resolve(cli.identity, cli.trust);

    match cli.command.unwrap_or(Commands::Run {
        port: 18455,
        pair: false,
    }) {
        Commands::Run { port, pair } => {
            commands::run_mesh(paths, cli.name, port, pair).await?
        }
        Commands::Info => commands::show_info(paths, cli.name)?,
        Commands::Pair { flow } => commands::run_pairing(paths, cli.name, flow)?,
        Commands::Send { addr, text } => commands::send_text(paths, addr, text).await?,
    }

    Ok(())
}
