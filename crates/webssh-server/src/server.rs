//! WebSocket accept loop: one TCP dial to the SSH host per client.

use crate::config::ServerConfig;
use anyhow::Context;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};
use webssh_core::TransportEndpoint;
use webssh_gateway::{Gateway, GatewayConfig, RusshConnector, WebSocketEndpoint};

/// Where the client asked to be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionPath<'a> {
    /// `<prefix>/<id>`: join (or create) the named session.
    Named(&'a str),
    /// `<prefix>` alone: the server picks a fresh id.
    Unnamed,
}

/// Match `path` against `prefix` and extract the session id, if any.
fn parse_session_path<'a>(path: &'a str, prefix: &str) -> Option<SessionPath<'a>> {
    let rest = path.strip_prefix(prefix)?;
    let id = match rest {
        "" | "/" => return Some(SessionPath::Unnamed),
        _ => rest.strip_prefix('/')?,
    };
    let valid = id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    valid.then_some(SessionPath::Named(id))
}

/// Generate a random session ID.
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

pub struct WebSshServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
}

impl WebSshServer {
    pub fn new(config: ServerConfig) -> Self {
        let connector = Arc::new(RusshConnector::new(config.buffer_size));
        let gateway_config = GatewayConfig::default().with_buffer_size(config.buffer_size);
        Self {
            gateway: Arc::new(Gateway::new(connector, gateway_config)),
            config,
        }
    }

    /// Accept clients until the listener fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen)
            .await
            .with_context(|| format!("bind {}", self.config.listen))?;
        info!(
            addr = %self.config.listen,
            ssh_target = %self.config.ssh_target,
            prefix = %self.config.path_prefix,
            "listening"
        );

        let sweeper = tokio::spawn(sweep_loop(self.gateway.clone(), self.config.clone()));
        let result = self.accept_loop(listener).await;
        sweeper.abort();
        result
    }

    async fn accept_loop(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, remote) = listener.accept().await.context("accept")?;
            let gateway = self.gateway.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(gateway, config, stream, remote).await {
                    warn!(remote = %remote, error = %format!("{e:#}"), "client rejected");
                }
            });
        }
    }
}

async fn handle_client(
    gateway: Arc<Gateway>,
    config: ServerConfig,
    stream: TcpStream,
    remote: SocketAddr,
) -> anyhow::Result<()> {
    let mut requested: Option<String> = None;
    let prefix = config.path_prefix.as_str();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let path = req.uri().path();
        match parse_session_path(path, prefix) {
            Some(SessionPath::Named(id)) => {
                requested = Some(id.to_string());
                Ok(resp)
            }
            Some(SessionPath::Unnamed) => Ok(resp),
            None => {
                let mut reject = ErrorResponse::new(Some(format!("no session route for {path}")));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            }
        }
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .context("websocket handshake")?;

    let session_id = requested.unwrap_or_else(generate_session_id);
    debug!(remote = %remote, session_id = %session_id, "websocket accepted");

    let endpoint = Arc::new(WebSocketEndpoint::new(ws, config.wire_format));
    let ssh = match TcpStream::connect(&config.ssh_target).await {
        Ok(ssh) => ssh,
        Err(e) => {
            error!(session_id = %session_id, target = %config.ssh_target, error = %e, "ssh dial failed");
            let _ = endpoint.close().await;
            return Err(e).with_context(|| format!("dial {}", config.ssh_target));
        }
    };
    // Keystrokes are tiny; don't let Nagle hold them back.
    ssh.set_nodelay(true).ok();

    gateway.register_network_endpoint(&session_id, Box::new(ssh));
    gateway.register_transport_endpoint(&session_id, endpoint);
    Ok(())
}

async fn sweep_loop(gateway: Arc<Gateway>, config: ServerConfig) {
    let mut ticker = tokio::time::interval(config.sweep_interval);
    loop {
        ticker.tick().await;
        let expired = gateway.sweep(config.pending_timeout);
        if expired > 0 {
            info!(expired, pending = gateway.pending_count(), "swept unpaired endpoints");
        }
    }
}
