//! Launcher App Stub
//!
//! Minimal app that registers with the launcher the way a real app would:
//! fresh Ed25519 session key, full handshake, then exit. The received grants
//! can be written to a file so callers can check what was issued.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ed25519_dalek::SigningKey;
use safe_launcher_client::{register_from_args, DEFAULT_REGISTER_TIMEOUT};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "launcher-app-stub", version)]
#[command(about = "Registers a session with safe-launcher and exits")]
struct Cli {
    /// Loopback port supplied by the launcher; read again by the client library
    #[arg(long = "launcher_port")]
    launcher_port: u16,

    /// Write the received grants as JSON to this file
    #[arg(long)]
    grants_out: Option<PathBuf>,

    /// Registration budget in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let session_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
    let budget = cli
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REGISTER_TIMEOUT);

    let grants = register_from_args(session_key.verifying_key().as_bytes(), budget)
        .await
        .with_context(|| format!("registration on port {} failed", cli.launcher_port))?;

    info!(count = grants.len(), "Session registered");

    if let Some(path) = cli.grants_out {
        let body = serde_json::to_string_pretty(&grants)?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed to write grants to {}", path.display()))?;
    }

    Ok(())
}
