//! Session bridge: the per-session protocol state machine.
//!
//! Reads envelopes from the transport endpoint strictly in order, drives
//! password authentication and shell setup through the [`SshConnector`],
//! forwards keystrokes and resizes, and starts the [`OutputRelay`] once the
//! shell is live. Any fatal condition ends the loop; teardown then closes
//! the SSH session, the network endpoint and the transport endpoint exactly
//! once.

mod relay;
mod state;

pub use relay::OutputRelay;
pub use state::{transition, Action, BridgeState};

use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use webssh_core::{Envelope, GatewayError, GatewayResult, SetupStep, TransportEndpoint};

use crate::config::GatewayConfig;
use crate::ssh::{AuthConfig, NetworkStream, PtyRequest, ShellSession, ShellWriter, SshConnector};

/// One bridging lifetime between a transport endpoint and an SSH host.
pub struct SessionBridge {
    session_id: String,
    transport: Arc<dyn TransportEndpoint>,
    network: Option<NetworkStream>,
    connector: Arc<dyn SshConnector>,
    config: GatewayConfig,
    state: BridgeState,
    auth: AuthConfig,
    session: Option<Box<dyn ShellSession>>,
    stdin: Option<ShellWriter>,
    relay: Option<OutputRelay>,
}

impl SessionBridge {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn TransportEndpoint>,
        network: NetworkStream,
        connector: Arc<dyn SshConnector>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
            network: Some(network),
            connector,
            config,
            state: BridgeState::Unauthenticated,
            auth: AuthConfig::default(),
            session: None,
            stdin: None,
            relay: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Run the message loop until a fatal condition, then tear down.
    /// Returns the condition that ended the session.
    pub async fn run(mut self) -> GatewayError {
        let reason = loop {
            let envelope = match self.transport.read_envelope().await {
                Ok(envelope) => envelope,
                Err(e) => break e,
            };
            debug!(session_id = %self.session_id, msg_type = %envelope.msg_type, state = %self.state, "new message");
            if let Err(e) = self.handle(envelope).await {
                break e;
            }
        };
        self.teardown().await;
        reason
    }

    async fn handle(&mut self, envelope: Envelope) -> GatewayResult<()> {
        match transition(self.state, envelope.msg_type) {
            Action::RecordUsername => {
                self.auth.username = envelope.data_str()?;
                info!(session_id = %self.session_id, user = %self.auth.username, "login");
                Ok(())
            }
            Action::Authenticate => {
                self.auth.passwords.push(envelope.data_str()?);
                self.establish().await
            }
            Action::RejectUnsupported => Err(GatewayError::UnsupportedAuth("publickey")),
            Action::ForwardStdin => {
                let Some(stdin) = self.stdin.as_mut() else {
                    debug!(session_id = %self.session_id, "stdin wait login");
                    return Ok(());
                };
                stdin
                    .write_all(&envelope.data)
                    .await
                    .map_err(|e| GatewayError::Remote(format!("write: {e}")))?;
                stdin
                    .flush()
                    .await
                    .map_err(|e| GatewayError::Remote(format!("write: {e}")))
            }
            Action::ForwardResize => {
                let Some(session) = self.session.as_mut() else {
                    debug!(session_id = %self.session_id, "resize wait session");
                    return Ok(());
                };
                session.window_change(envelope.rows, envelope.cols).await
            }
            Action::Discard(reason) => {
                debug!(session_id = %self.session_id, msg_type = %envelope.msg_type, reason, "message discarded");
                Ok(())
            }
        }
    }

    /// Authenticate, open the pty session and start the shell.
    async fn establish(&mut self) -> GatewayResult<()> {
        let network = self
            .network
            .take()
            .ok_or_else(|| GatewayError::Other("network endpoint already consumed".into()))?;
        let pty = PtyRequest::xterm(pty_speed(self.config.buffer_size));
        let mut session = self
            .connector
            .open_shell_session(network, &self.auth, &pty)
            .await?;
        self.state = BridgeState::ShellStarting;

        let started = start_shell(
            session.as_mut(),
            &self.session_id,
            self.transport.clone(),
            self.config.buffer_size,
        )
        .await;
        self.session = Some(session);
        let (stdin, relay) = started?;
        self.stdin = Some(stdin);
        self.relay = Some(relay);
        self.state = BridgeState::Active;
        info!(session_id = %self.session_id, user = %self.auth.username, "shell started");
        Ok(())
    }

    async fn teardown(&mut self) {
        self.state = BridgeState::Terminated;
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                debug!(session_id = %self.session_id, error = %e, "ssh session close failed");
            }
        }
        if let Some(relay) = self.relay.take() {
            relay.stop();
        }
        if let Some(mut network) = self.network.take() {
            let _ = network.shutdown().await;
        }
        if let Err(e) = self.transport.close().await {
            warn!(session_id = %self.session_id, error = %e, "transport close failed");
        }
        debug!(session_id = %self.session_id, "session torn down");
    }
}

/// Terminal speed advertised for the pty; follows the read buffer size.
fn pty_speed(buffer_size: usize) -> u32 {
    u32::try_from(buffer_size).unwrap_or(u32::MAX)
}

/// Take the pipes, start the relay, then request the shell. Each failure is
/// reported with the step it happened in.
async fn start_shell(
    session: &mut dyn ShellSession,
    session_id: &str,
    transport: Arc<dyn TransportEndpoint>,
    buffer_size: usize,
) -> GatewayResult<(ShellWriter, OutputRelay)> {
    let stdin = session
        .stdin_pipe()
        .map_err(|e| GatewayError::setup(SetupStep::StdinPipe, e))?;
    let stdout = session
        .stdout_pipe()
        .map_err(|e| GatewayError::setup(SetupStep::OutputPipe, e))?;
    let stderr = session
        .stderr_pipe()
        .map_err(|e| GatewayError::setup(SetupStep::OutputPipe, e))?;
    let relay = OutputRelay::start(session_id, transport, stdout, stderr, buffer_size);
    session.shell().await.map_err(|e| match e {
        setup @ GatewayError::Setup { .. } => setup,
        other => GatewayError::setup(SetupStep::Shell, other),
    })?;
    Ok((stdin, relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::fake::{FakeConnector, RemoteShell};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use webssh_core::{MemoryPeer, MemoryTransport, MessageType};

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        peer: MemoryPeer,
        network_peer: DuplexStream,
        remotes: mpsc::UnboundedReceiver<RemoteShell>,
        connector: Arc<FakeConnector>,
        bridge: JoinHandle<GatewayError>,
    }

    fn start(connector: FakeConnector, remotes: mpsc::UnboundedReceiver<RemoteShell>) -> Harness {
        let (endpoint, peer) = MemoryTransport::pair();
        let (network, network_peer) = tokio::io::duplex(1024);
        let connector = Arc::new(connector);
        let bridge = SessionBridge::new(
            "test-session",
            Arc::new(endpoint),
            Box::new(network),
            connector.clone(),
            GatewayConfig::default(),
        );
        Harness {
            peer,
            network_peer,
            remotes,
            connector,
            bridge: tokio::spawn(bridge.run()),
        }
    }

    fn harness(password: &str) -> Harness {
        let (connector, remotes) = FakeConnector::new(password);
        start(connector, remotes)
    }

    impl Harness {
        async fn finished(self) -> (GatewayError, Harness2) {
            let Harness {
                peer,
                network_peer,
                remotes,
                connector,
                bridge,
            } = self;
            let reason = tokio::time::timeout(TIMEOUT, bridge)
                .await
                .expect("bridge should terminate")
                .expect("bridge task panicked");
            (
                reason,
                Harness2 {
                    peer,
                    network_peer,
                    remotes,
                    connector,
                },
            )
        }

        async fn remote(&mut self) -> RemoteShell {
            tokio::time::timeout(TIMEOUT, self.remotes.recv())
                .await
                .expect("shell should open")
                .expect("connector dropped")
        }
    }

    struct Harness2 {
        peer: MemoryPeer,
        network_peer: DuplexStream,
        remotes: mpsc::UnboundedReceiver<RemoteShell>,
        connector: Arc<FakeConnector>,
    }

    async fn read_exactly(pipe: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(TIMEOUT, pipe.read_exact(&mut buf))
            .await
            .expect("timed out reading pipe")
            .unwrap();
        buf
    }

    async fn network_closed(pipe: &mut DuplexStream) -> bool {
        let mut buf = [0u8; 1];
        matches!(
            tokio::time::timeout(TIMEOUT, pipe.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    #[tokio::test]
    async fn wrong_password_terminates_and_closes_everything() {
        let h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("wrong"));

        let (reason, mut rest) = h.finished().await;
        assert!(matches!(reason, GatewayError::AuthFailed(_)), "{reason}");
        assert!(rest.peer.is_closed());
        assert!(network_closed(&mut rest.network_peer).await);
        assert!(rest.remotes.try_recv().is_err(), "no shell should have started");
        assert_eq!(rest.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn stdin_reaches_shell_byte_for_byte() {
        let mut h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let mut remote = h.remote().await;
        assert_eq!(remote.auth.username, "alice");
        assert_eq!(remote.auth.passwords, vec!["right".to_string()]);
        assert_eq!(remote.pty, PtyRequest::xterm(512));

        let keystrokes = b"ls -la\r\x1b[A\x03".to_vec();
        h.peer.send(Envelope::stdin(keystrokes.clone()));
        assert_eq!(read_exactly(&mut remote.stdin, keystrokes.len()).await, keystrokes);
        assert!(remote.shell_started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn premature_stdin_is_dropped() {
        let mut h = harness("right");
        h.peer.send(Envelope::stdin(b"too early".to_vec()));
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let mut remote = h.remote().await;

        h.peer.send(Envelope::stdin(b"ok".to_vec()));
        assert_eq!(read_exactly(&mut remote.stdin, 2).await, b"ok");
    }

    #[tokio::test]
    async fn resize_in_active_propagates_once() {
        let mut h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let mut remote = h.remote().await;

        h.peer.send(Envelope::resize(24, 100));
        // Messages are handled in order: once the marker arrives the resize is done.
        h.peer.send(Envelope::stdin(b"!".to_vec()));
        read_exactly(&mut remote.stdin, 1).await;
        assert_eq!(*remote.resizes.lock().unwrap(), vec![(24, 100)]);
    }

    #[tokio::test]
    async fn resize_before_auth_is_dropped_and_session_survives() {
        let mut h = harness("right");
        h.peer.send(Envelope::resize(24, 100));
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let mut remote = h.remote().await;

        h.peer.send(Envelope::stdin(b"!".to_vec()));
        read_exactly(&mut remote.stdin, 1).await;
        assert!(remote.resizes.lock().unwrap().is_empty());
        assert!(!h.peer.is_closed());
    }

    #[tokio::test]
    async fn publickey_before_auth_terminates() {
        let h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::publickey());
        // Never processed.
        h.peer.send(Envelope::password("right"));

        let (reason, mut rest) = h.finished().await;
        assert!(matches!(reason, GatewayError::UnsupportedAuth("publickey")));
        assert!(rest.peer.is_closed());
        assert!(network_closed(&mut rest.network_peer).await);
        assert_eq!(rest.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn publickey_while_active_terminates_and_closes_session() {
        let mut h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let remote = h.remote().await;

        h.peer.send(Envelope::publickey());
        let (reason, rest) = h.finished().await;
        assert!(matches!(reason, GatewayError::UnsupportedAuth(_)));
        assert!(rest.peer.is_closed());
        assert_eq!(remote.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn credentials_after_auth_are_inert() {
        let mut h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let mut remote = h.remote().await;

        h.peer.send(Envelope::login("mallory"));
        h.peer.send(Envelope::password("right"));
        h.peer.send(Envelope::stdin(b"!".to_vec()));
        read_exactly(&mut remote.stdin, 1).await;

        assert_eq!(h.connector.attempts(), 1);
        assert!(h.remotes.try_recv().is_err());
    }

    #[tokio::test]
    async fn shell_output_flows_back_as_envelopes() {
        use tokio::io::AsyncWriteExt;

        let mut h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let mut remote = h.remote().await;

        remote.stdout.write_all(b"foo").await.unwrap();
        let first = tokio::time::timeout(TIMEOUT, h.peer.recv()).await.unwrap().unwrap();
        remote.stdout.write_all(b"bar").await.unwrap();
        let second = tokio::time::timeout(TIMEOUT, h.peer.recv()).await.unwrap().unwrap();
        remote.stderr.write_all(b"warn").await.unwrap();
        let third = tokio::time::timeout(TIMEOUT, h.peer.recv()).await.unwrap().unwrap();

        assert_eq!(first, Envelope::output(MessageType::Stdout, b"foo"));
        assert_eq!(second, Envelope::output(MessageType::Stdout, b"bar"));
        assert_eq!(third, Envelope::output(MessageType::Stderr, b"warn"));
    }

    #[tokio::test]
    async fn client_disconnect_tears_down_once() {
        let mut h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let mut remote = h.remote().await;

        h.peer.disconnect();
        let (reason, rest) = h.finished().await;
        assert!(matches!(reason, GatewayError::Transport(_)));
        assert!(rest.peer.is_closed());
        assert_eq!(remote.closed.load(Ordering::SeqCst), 1);

        // The shell's stdin is shut down along with the session.
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(TIMEOUT, remote.stdin.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn setup_failures_name_the_step() {
        for step in [SetupStep::StdinPipe, SetupStep::OutputPipe, SetupStep::Shell] {
            let (connector, remotes) = FakeConnector::new("right");
            let h = start(connector.failing_at(step), remotes);
            h.peer.send(Envelope::login("alice"));
            h.peer.send(Envelope::password("right"));

            let (reason, mut rest) = h.finished().await;
            match reason {
                GatewayError::Setup { step: failed, .. } => assert_eq!(failed, step),
                other => panic!("expected setup error, got {other}"),
            }
            assert!(rest.peer.is_closed());
            let remote = rest.remotes.try_recv().expect("session was opened");
            assert_eq!(remote.closed.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn stdin_write_failure_terminates() {
        let mut h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let remote = h.remote().await;

        drop(remote.stdin);
        h.peer.send(Envelope::stdin(b"ls\r".to_vec()));
        let (reason, rest) = h.finished().await;
        assert!(matches!(reason, GatewayError::Remote(_)), "{reason}");
        assert!(rest.peer.is_closed());
        assert_eq!(remote.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resize_failure_terminates() {
        let (connector, remotes) = FakeConnector::new("right");
        let mut h = start(connector.failing_resize(), remotes);
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::password("right"));
        let remote = h.remote().await;

        h.peer.send(Envelope::resize(24, 100));
        let (reason, rest) = h.finished().await;
        assert!(matches!(reason, GatewayError::Remote(_)), "{reason}");
        assert!(rest.peer.is_closed());
        assert_eq!(remote.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_utf8_password_terminates_without_auth() {
        let h = harness("right");
        h.peer.send(Envelope::login("alice"));
        h.peer.send(Envelope::new(MessageType::Password, vec![0xff, 0xfe]));

        let (reason, rest) = h.finished().await;
        assert!(matches!(reason, GatewayError::Codec(_)), "{reason}");
        assert!(rest.peer.is_closed());
        assert_eq!(rest.connector.attempts(), 0);
    }

    #[test]
    fn pty_speed_saturates() {
        assert_eq!(pty_speed(512), 512);
        assert_eq!(pty_speed(u32::MAX as usize), u32::MAX);
        assert_eq!(pty_speed(usize::MAX), u32::MAX);
    }
}
