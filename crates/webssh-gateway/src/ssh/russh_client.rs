//! `russh`-backed SSH collaborator.
//!
//! A pump task owns the session channel. It forwards bytes written to the
//! stdin pipe into the channel, routes channel data to the stdout pipe and
//! extended data (stderr) to the stderr pipe, and executes shell / resize /
//! close commands. A shell command is answered only when the server accepts
//! or rejects the request. When the pump exits it drops the output pipes, so the
//! relay readers see EOF.

use super::{AuthConfig, NetworkStream, PtyRequest, ShellReader, ShellSession, ShellWriter, SshConnector};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webssh_core::{GatewayError, GatewayResult, SetupStep};

/// In-memory pipe capacity between the pump and the bridge.
const PIPE_CAPACITY: usize = 64 * 1024;

/// SSH extended data type for stderr.
const EXTENDED_DATA_STDERR: u32 = 1;

/// Client handler. Host keys are not pinned: any server key is accepted.
struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens shell sessions with `russh`.
pub struct RusshConnector {
    config: Arc<client::Config>,
    buffer_size: usize,
}

impl RusshConnector {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            buffer_size: buffer_size.max(1),
        }
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn open_shell_session(
        &self,
        stream: NetworkStream,
        auth: &AuthConfig,
        pty: &PtyRequest,
    ) -> GatewayResult<Box<dyn ShellSession>> {
        let mut handle = client::connect_stream(self.config.clone(), stream, AcceptAnyHostKey)
            .await
            .map_err(|e| GatewayError::AuthFailed(format!("client: {e}")))?;

        let mut authenticated = false;
        for password in &auth.passwords {
            let result = handle
                .authenticate_password(auth.username.clone(), password.clone())
                .await
                .map_err(|e| GatewayError::AuthFailed(format!("client: {e}")))?;
            if result.success() {
                authenticated = true;
                break;
            }
        }
        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(GatewayError::AuthFailed(format!(
                "no accepted password for user {:?}",
                auth.username
            )));
        }
        info!(user = %auth.username, "ssh authenticated");

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| GatewayError::AuthFailed(format!("session: {e}")))?;

        let modes = [
            (Pty::ECHO, u32::from(pty.echo)),
            (Pty::TTY_OP_ISPEED, pty.speed),
            (Pty::TTY_OP_OSPEED, pty.speed),
        ];
        channel
            .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &modes)
            .await
            .map_err(|e| GatewayError::setup(SetupStep::Pty, e))?;

        Ok(Box::new(RusshShell::start(handle, channel, self.buffer_size)))
    }
}

enum Command {
    Shell(oneshot::Sender<Result<(), String>>),
    Resize {
        rows: u32,
        cols: u32,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Close,
}

type Reply = oneshot::Sender<Result<(), String>>;

/// Reply owed to a `shell` request until the server answers it with
/// `Success` or `Failure`.
#[derive(Default)]
struct PendingShell(Option<Reply>);

impl PendingShell {
    fn wait(&mut self, reply: Reply) {
        if let Some(previous) = self.0.replace(reply) {
            let _ = previous.send(Err("superseded by a new shell request".into()));
        }
    }

    /// Answer the outstanding request. Returns false if none was waiting.
    fn resolve(&mut self, result: Result<(), String>) -> bool {
        match self.0.take() {
            Some(reply) => {
                let _ = reply.send(result);
                true
            }
            None => false,
        }
    }
}

/// A live `russh` session channel.
pub struct RusshShell {
    handle: Handle<AcceptAnyHostKey>,
    commands: mpsc::Sender<Command>,
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    pump: JoinHandle<()>,
    closed: bool,
}

impl RusshShell {
    fn start(handle: Handle<AcceptAnyHostKey>, channel: Channel<client::Msg>, buffer_size: usize) -> Self {
        let (stdin, pump_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout, pump_stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr, pump_stderr) = tokio::io::duplex(PIPE_CAPACITY);
        let (commands, command_rx) = mpsc::channel(8);

        let pump = tokio::spawn(async move {
            pump(channel, command_rx, pump_stdin, pump_stdout, pump_stderr, buffer_size).await;
            debug!("ssh channel pump ended");
        });

        Self {
            handle,
            commands,
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
            pump,
            closed: false,
        }
    }
}

/// Send a command to the pump and wait for its reply.
async fn request(
    commands: &mpsc::Sender<Command>,
    build: impl FnOnce(oneshot::Sender<Result<(), String>>) -> Command,
) -> Result<(), String> {
    let (reply, response) = oneshot::channel();
    commands
        .send(build(reply))
        .await
        .map_err(|_| "channel closed".to_string())?;
    response.await.map_err(|_| "channel closed".to_string())?
}

#[async_trait]
impl ShellSession for RusshShell {
    fn stdin_pipe(&mut self) -> GatewayResult<ShellWriter> {
        let pipe = self
            .stdin
            .take()
            .ok_or_else(|| GatewayError::Other("stdin already taken".into()))?;
        Ok(Box::new(pipe))
    }

    fn stdout_pipe(&mut self) -> GatewayResult<ShellReader> {
        let pipe = self
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Other("stdout already taken".into()))?;
        Ok(Box::new(pipe))
    }

    fn stderr_pipe(&mut self) -> GatewayResult<ShellReader> {
        let pipe = self
            .stderr
            .take()
            .ok_or_else(|| GatewayError::Other("stderr already taken".into()))?;
        Ok(Box::new(pipe))
    }

    async fn shell(&mut self) -> GatewayResult<()> {
        request(&self.commands, Command::Shell)
            .await
            .map_err(|e| GatewayError::setup(SetupStep::Shell, e))
    }

    async fn window_change(&mut self, rows: u32, cols: u32) -> GatewayResult<()> {
        request(&self.commands, |reply| Command::Resize { rows, cols, reply })
            .await
            .map_err(|e| GatewayError::Remote(format!("resize: {e}")))
    }

    async fn close(&mut self) -> GatewayResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The pump may already be gone if the server closed the channel.
        let _ = self.commands.send(Command::Close).await;
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "ssh disconnect failed");
        }
        Ok(())
    }
}

impl Drop for RusshShell {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(
    mut channel: Channel<client::Msg>,
    mut commands: mpsc::Receiver<Command>,
    mut stdin: DuplexStream,
    mut stdout: DuplexStream,
    mut stderr: DuplexStream,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    let mut stdin_open = true;
    let mut pending_shell = PendingShell::default();

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if let Err(e) = stdout.write_all(&data).await {
                        debug!(error = %e, "stdout pipe closed");
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == EXTENDED_DATA_STDERR => {
                    if let Err(e) = stderr.write_all(&data).await {
                        debug!(error = %e, "stderr pipe closed");
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    info!(exit_status, "remote shell exited");
                }
                Some(ChannelMsg::Success) => {
                    pending_shell.resolve(Ok(()));
                }
                Some(ChannelMsg::Failure) => {
                    if !pending_shell.resolve(Err("shell request rejected".into())) {
                        warn!("remote rejected a channel request");
                    }
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            read = stdin.read(&mut buf), if stdin_open => match read {
                Ok(0) | Err(_) => {
                    stdin_open = false;
                    let _ = channel.eof().await;
                }
                Ok(n) => {
                    if let Err(e) = channel.data(&buf[..n]).await {
                        warn!(error = %e, "forwarding stdin failed");
                        break;
                    }
                }
            },
            command = commands.recv() => match command {
                Some(Command::Shell(reply)) => match channel.request_shell(true).await {
                    Ok(()) => pending_shell.wait(reply),
                    Err(e) => {
                        let _ = reply.send(Err(e.to_string()));
                    }
                },
                Some(Command::Resize { rows, cols, reply }) => {
                    let result = channel
                        .window_change(cols, rows, 0, 0)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = reply.send(result);
                }
                Some(Command::Close) | None => {
                    let _ = channel.close().await;
                    break;
                }
            },
        }
    }
    pending_shell.resolve(Err("channel closed before the shell started".into()));
}
