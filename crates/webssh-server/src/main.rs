//! webssh-server: terminal access to an SSH host over WebSocket.
//!
//! Each browser connection gets its own TCP connection to the configured
//! SSH host; the gateway pairs the two by session id and runs the login,
//! shell and output relay for the pair.

mod config;
mod server;

use clap::Parser;
use config::{Overrides, ServerConfig};
use server::WebSshServer;
use std::path::PathBuf;
use tracing::{error, info, warn};
use webssh_core::WireFormat;

/// webssh-server: SSH over WebSocket gateway
#[derive(Parser, Debug)]
#[command(name = "webssh-server", version, about = "SSH over WebSocket gateway")]
struct Cli {
    /// Listen address (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// SSH host to dial for every session (host:port)
    #[arg(long)]
    ssh_target: Option<String>,

    /// Read size of the output relay, also advertised as PTY speed
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Envelope encoding for outbound frames (json, cbor)
    #[arg(long)]
    wire_format: Option<WireFormat>,

    /// Config file path
    #[arg(long, default_value = "~/.webssh/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting webssh-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = Overrides {
        listen: cli.listen,
        ssh_target: cli.ssh_target,
        buffer_size: cli.buffer_size,
        wire_format: cli.wire_format,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = WebSshServer::new(server_config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %format!("{e:#}"), "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("webssh-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
