//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use webssh_core::{GatewayError, GatewayResult, WireFormat};
use webssh_gateway::config::DEFAULT_BUFFER_SIZE;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_ssh_target")]
    pub ssh_target: String,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ssh_target: default_ssh_target(),
            path_prefix: default_path_prefix(),
            buffer_size: default_buffer_size(),
            wire_format: WireFormat::default(),
            pending_timeout: default_pending_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8022".to_string()
}
fn default_ssh_target() -> String {
    "127.0.0.1:22".to_string()
}
fn default_path_prefix() -> String {
    "/ssh".to_string()
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_pending_timeout() -> u64 {
    60
}
fn default_sweep_interval() -> u64 {
    30
}

/// Command-line overrides; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub ssh_target: Option<String>,
    pub buffer_size: Option<usize>,
    pub wire_format: Option<WireFormat>,
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub ssh_target: String,
    pub path_prefix: String,
    pub buffer_size: usize,
    pub wire_format: WireFormat,
    pub pending_timeout: Duration,
    pub sweep_interval: Duration,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> GatewayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| GatewayError::Other(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, overrides)
    }

    fn resolve(file_config: ConfigFile, overrides: Overrides) -> GatewayResult<Self> {
        let server = file_config.server;
        let listen_str = overrides.listen.unwrap_or(server.listen);
        let listen = listen_str
            .parse()
            .map_err(|e| GatewayError::Other(format!("invalid listen address {listen_str:?}: {e}")))?;

        let mut path_prefix = server.path_prefix.trim_end_matches('/').to_string();
        if !path_prefix.starts_with('/') {
            path_prefix.insert(0, '/');
        }

        let buffer_size = overrides.buffer_size.unwrap_or(server.buffer_size);
        if buffer_size == 0 {
            return Err(GatewayError::Other("buffer_size must be positive".into()));
        }

        Ok(Self {
            listen,
            ssh_target: overrides.ssh_target.unwrap_or(server.ssh_target),
            path_prefix,
            buffer_size,
            wire_format: overrides.wire_format.unwrap_or(server.wire_format),
            pending_timeout: Duration::from_secs(server.pending_timeout),
            sweep_interval: Duration::from_secs(server.sweep_interval.max(1)),
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
