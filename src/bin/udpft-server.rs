//! File transfer server.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};
use udp_file_transfer::config::{partition_warnings, TransferConfig};
use udp_file_transfer::server::start_server;
use udp_file_transfer::utils::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "udpft-server", version)]
#[command(about = "Serve files over the reliable UDP transfer protocol", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address to bind, e.g. 0.0.0.0:12345
    #[arg(long, short)]
    address: Option<String>,

    /// Directory files are served from and stored into
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Accept transfers using the legacy XOR transform
    #[arg(long)]
    allow_legacy_xor: bool,

    /// Print an example configuration and exit
    #[arg(long)]
    example_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.example_config {
        println!("{}", TransferConfig::example_config());
        return ExitCode::SUCCESS;
    }

    let mut config = match &cli.config {
        Some(path) => match TransferConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => TransferConfig::default(),
    };
    config.apply_env();
    if let Some(address) = cli.address {
        config.server.address = address;
    }
    if let Some(root) = cli.storage_root {
        config.server.storage_root = root;
    }
    config.transport.allow_legacy_xor |= cli.allow_legacy_xor;

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let (warnings, errors) = partition_warnings(config.validate());
    for msg in &warnings {
        warn!("{msg}");
    }
    if !errors.is_empty() {
        for msg in &errors {
            error!("{msg}");
        }
        return ExitCode::FAILURE;
    }

    match start_server(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
