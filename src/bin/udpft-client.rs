//! File transfer client.

use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use udp_file_transfer::client::TransferClient;
use udp_file_transfer::config::{partition_warnings, TransferConfig};
use udp_file_transfer::error::{ProtocolError, Result};
use udp_file_transfer::utils::crypto::CipherSuite;
use udp_file_transfer::utils::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "udpft-client", version)]
#[command(about = "Read, write and delete files on a udpft server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Server address, e.g. 127.0.0.1:12345
    #[arg(long, short)]
    server: Option<String>,

    /// Use the legacy XOR transform instead of XChaCha20-Poly1305
    #[arg(long)]
    legacy_xor: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a file from the server
    Get {
        name: String,
        /// Local destination (defaults to the remote name)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Upload a local file
    Put {
        path: PathBuf,
        /// Remote name (defaults to the local file name)
        #[arg(long, short)]
        name: Option<String>,
    },
    /// Delete a file on the server
    Delete { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

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
    if let Some(server) = &cli.server {
        config.client.server_address = server.clone();
    }
    if cli.legacy_xor {
        config.transport.cipher_suite = CipherSuite::Xor;
    }
    config.logging.log_to_file = false;
    if cli.config.is_none() {
        config.logging.log_level = tracing::Level::WARN;
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let (warnings, errors) = partition_warnings(config.validate_client());
    for msg in &warnings {
        warn!("{msg}");
    }
    if !errors.is_empty() {
        for msg in &errors {
            eprintln!("{msg}");
        }
        return ExitCode::FAILURE;
    }

    let mut client = match TransferClient::bind(&config.client, &config.transport).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        match execute(&mut client, &cli.command).await {
            Ok(()) => return ExitCode::SUCCESS,
            Err(e @ ProtocolError::AckTimeout { .. }) => {
                eprintln!("{e}");
                if !confirm_retry().await {
                    return ExitCode::FAILURE;
                }
            }
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }
}

async fn execute(client: &mut TransferClient, command: &Command) -> Result<()> {
    match command {
        Command::Get { name, output } => {
            let dest = output.clone().unwrap_or_else(|| PathBuf::from(name));
            let report = client.download(name, &dest).await?;
            println!("Downloaded {} ({} bytes) to {}", name, report.bytes, dest.display());
            if !report.is_complete() {
                eprintln!(
                    "Warning: {} chunk(s) discarded, {} missing",
                    report.discarded, report.missing
                );
            }
        }
        Command::Put { path, name } => {
            let remote = match name {
                Some(name) => name.clone(),
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| ProtocolError::Custom(format!("No file name in {}", path.display())))?,
            };
            let report = client.upload(path, &remote).await?;
            println!("Uploaded {} as {} ({} bytes)", path.display(), remote, report.bytes);
        }
        Command::Delete { name } => {
            let note = client.delete(name).await?;
            println!("{note}");
        }
    }
    Ok(())
}

/// Ask whether to try again; never retries without a terminal.
async fn confirm_retry() -> bool {
    if !std::io::stdin().is_terminal() {
        return false;
    }
    let mut stdout = tokio::io::stdout();
    if stdout.write_all(b"Retry? [y/N] ").await.is_err() || stdout.flush().await.is_err() {
        return false;
    }
    let mut line = String::new();
    match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
        Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}
