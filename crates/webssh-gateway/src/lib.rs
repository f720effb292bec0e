//! webssh-gateway: bridges a message-oriented client transport to an
//! interactive SSH shell.
//!
//! Two half-connections arrive independently per session: a transport
//! endpoint (the client) and a network endpoint (a byte stream to the SSH
//! host). The [`Gateway`] pairs them by session identifier through the
//! [`SessionRegistry`] and launches exactly one [`SessionBridge`] per pair.

pub mod bridge;
pub mod config;
pub mod gateway;
pub mod registry;
pub mod ssh;
pub mod transport;

pub use bridge::{BridgeState, OutputRelay, SessionBridge};
pub use config::GatewayConfig;
pub use gateway::{Gateway, Registration};
pub use registry::{Endpoint, EndpointKind, EndpointPair, RegisterOutcome, SessionRegistry};
pub use ssh::{AuthConfig, NetworkStream, PtyRequest, RusshConnector, ShellSession, SshConnector};
pub use transport::WebSocketEndpoint;
