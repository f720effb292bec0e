//! Process-wide entry point: registration of the two half-connections and
//! launch of one bridge per completed pair.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use webssh_core::TransportEndpoint;

use crate::bridge::SessionBridge;
use crate::config::GatewayConfig;
use crate::registry::{Endpoint, RegisterOutcome, SessionRegistry};
use crate::ssh::{NetworkStream, SshConnector};

/// Outcome of a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Stored; waiting for the other half.
    Pending,
    /// This call completed the pair and launched the bridge.
    Launched,
    /// The session already launched (or this half is already waiting). The
    /// endpoint passed in has been closed.
    Duplicate,
}

type TransportHandle = Arc<dyn TransportEndpoint>;

/// Owns the session registry and the configuration shared by every bridge.
///
/// Registration must happen inside a Tokio runtime: bridges are spawned as
/// independent tasks.
pub struct Gateway {
    registry: SessionRegistry<TransportHandle, NetworkStream>,
    connector: Arc<dyn SshConnector>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(connector: Arc<dyn SshConnector>, config: GatewayConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            connector,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Register the client-facing half of session `session_id`.
    pub fn register_transport_endpoint(&self, session_id: &str, endpoint: TransportHandle) -> Registration {
        info!(session_id, "add transport endpoint");
        self.register(session_id, Endpoint::Transport(endpoint))
    }

    /// Register the SSH-host-facing half of session `session_id`.
    pub fn register_network_endpoint(&self, session_id: &str, stream: NetworkStream) -> Registration {
        info!(session_id, "add network endpoint");
        self.register(session_id, Endpoint::Network(stream))
    }

    fn register(&self, session_id: &str, endpoint: Endpoint<TransportHandle, NetworkStream>) -> Registration {
        match self.registry.register(session_id, endpoint) {
            RegisterOutcome::Stored => Registration::Pending,
            RegisterOutcome::Paired(pair) => {
                info!(session_id, "ready");
                let bridge = SessionBridge::new(
                    session_id,
                    pair.transport,
                    pair.network,
                    self.connector.clone(),
                    self.config,
                );
                let session_id = session_id.to_string();
                tokio::spawn(async move {
                    let reason = bridge.run().await;
                    info!(session_id = %session_id, reason = %reason, "server exit");
                });
                Registration::Launched
            }
            RegisterOutcome::Rejected(surplus) => {
                warn!(session_id, kind = ?surplus.kind(), "duplicate registration ignored");
                close_endpoint(surplus);
                Registration::Duplicate
            }
        }
    }

    /// Close halves that waited longer than `max_age` for a partner.
    /// Launched identifiers stay reserved. Returns how many halves were
    /// closed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let expired = self.registry.sweep(max_age);
        let count = expired.len();
        for (session_id, endpoint) in expired {
            info!(session_id = %session_id, kind = ?endpoint.kind(), "unpaired endpoint expired");
            close_endpoint(endpoint);
        }
        count
    }

    /// Sessions with one half waiting.
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    /// Sessions whose bridge has been launched.
    pub fn launched_count(&self) -> usize {
        self.registry.launched_count()
    }
}

fn close_endpoint(endpoint: Endpoint<TransportHandle, NetworkStream>) {
    match endpoint {
        Endpoint::Transport(transport) => {
            tokio::spawn(async move {
                let _ = transport.close().await;
            });
        }
        // Dropping the stream closes it.
        Endpoint::Network(stream) => drop(stream),
    }
}
