//! SSH collaborator interface.
//!
//! The bridge only needs to open an authenticated shell session over an
//! already-established byte stream, take its three pipes, start the shell,
//! and forward window changes. [`RusshConnector`] implements this on top of
//! `russh`.

mod russh_client;
#[cfg(test)]
pub(crate) mod fake;

pub use russh_client::RusshConnector;

use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use webssh_core::{GatewayResult, DEFAULT_COLS, DEFAULT_ROWS};

/// A raw bidirectional byte stream to the SSH host.
pub trait NetworkIo: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T> NetworkIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

pub type NetworkStream = Box<dyn NetworkIo>;

/// Writable handle to the remote shell's standard input.
pub type ShellWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable handle to one of the remote shell's output streams.
pub type ShellReader = Box<dyn AsyncRead + Send + Unpin>;

/// Credentials accumulated from `login` / `password` messages.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub username: String,
    pub passwords: Vec<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("passwords", &self.passwords.len())
            .finish()
    }
}

/// Pseudo-terminal requested for every shell session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub echo: bool,
    /// Terminal input/output speed mode value.
    pub speed: u32,
}

impl PtyRequest {
    /// `xterm`, 80×40, echo on.
    pub fn xterm(speed: u32) -> Self {
        Self {
            term: "xterm".to_string(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            echo: true,
            speed,
        }
    }
}

/// Opens authenticated shell sessions.
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Run the SSH handshake over `stream`, authenticate with `auth`, open a
    /// session channel and request `pty` on it.
    ///
    /// Authentication failures are reported as
    /// [`webssh_core::GatewayError::AuthFailed`]. The stream is consumed
    /// either way.
    async fn open_shell_session(
        &self,
        stream: NetworkStream,
        auth: &AuthConfig,
        pty: &PtyRequest,
    ) -> GatewayResult<Box<dyn ShellSession>>;
}

/// An SSH session channel with a pseudo-terminal, before and after the
/// shell is started.
#[async_trait]
pub trait ShellSession: Send {
    /// Take the input stream. Only available once.
    fn stdin_pipe(&mut self) -> GatewayResult<ShellWriter>;

    /// Take the standard output stream. Only available once.
    fn stdout_pipe(&mut self) -> GatewayResult<ShellReader>;

    /// Take the standard error stream. Only available once.
    fn stderr_pipe(&mut self) -> GatewayResult<ShellReader>;

    /// Request shell execution.
    async fn shell(&mut self) -> GatewayResult<()>;

    /// Propagate a terminal resize.
    async fn window_change(&mut self, rows: u32, cols: u32) -> GatewayResult<()>;

    /// Close the session. Safe to call more than once.
    async fn close(&mut self) -> GatewayResult<()>;
}
