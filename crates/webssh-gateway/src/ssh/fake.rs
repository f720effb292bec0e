//! Scripted SSH collaborator for tests.

use super::{AuthConfig, NetworkStream, PtyRequest, ShellReader, ShellSession, ShellWriter, SshConnector};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use webssh_core::{GatewayError, GatewayResult, SetupStep};

/// Test-side view of a shell opened by [`FakeConnector`].
pub struct RemoteShell {
    /// Reads what the bridge wrote to the shell's stdin.
    pub stdin: DuplexStream,
    /// Writes that the relay will see as shell stdout.
    pub stdout: DuplexStream,
    /// Writes that the relay will see as shell stderr.
    pub stderr: DuplexStream,
    pub auth: AuthConfig,
    pub pty: PtyRequest,
    pub resizes: Arc<Mutex<Vec<(u32, u32)>>>,
    pub shell_started: Arc<AtomicBool>,
    pub closed: Arc<AtomicUsize>,
}

/// Accepts exactly one password and hands a [`RemoteShell`] to the test for
/// every session it opens.
pub struct FakeConnector {
    password: String,
    fail_step: Option<SetupStep>,
    fail_resize: bool,
    attempts: AtomicUsize,
    remotes: mpsc::UnboundedSender<RemoteShell>,
}

impl FakeConnector {
    pub fn new(password: &str) -> (Self, mpsc::UnboundedReceiver<RemoteShell>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (
            Self {
                password: password.to_string(),
                fail_step: None,
                fail_resize: false,
                attempts: AtomicUsize::new(0),
                remotes,
            },
            rx,
        )
    }

    /// Make the opened session fail at `step`.
    pub fn failing_at(mut self, step: SetupStep) -> Self {
        self.fail_step = Some(step);
        self
    }

    /// Make every window change on opened sessions fail.
    pub fn failing_resize(mut self) -> Self {
        self.fail_resize = true;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn open_shell_session(
        &self,
        stream: NetworkStream,
        auth: &AuthConfig,
        pty: &PtyRequest,
    ) -> GatewayResult<Box<dyn ShellSession>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !auth.passwords.iter().any(|p| *p == self.password) {
            drop(stream);
            return Err(GatewayError::AuthFailed("password rejected".into()));
        }

        let (stdin, remote_stdin) = tokio::io::duplex(4096);
        let (stdout, remote_stdout) = tokio::io::duplex(4096);
        let (stderr, remote_stderr) = tokio::io::duplex(4096);
        let resizes = Arc::new(Mutex::new(Vec::new()));
        let shell_started = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicUsize::new(0));

        let _ = self.remotes.send(RemoteShell {
            stdin: remote_stdin,
            stdout: remote_stdout,
            stderr: remote_stderr,
            auth: auth.clone(),
            pty: pty.clone(),
            resizes: resizes.clone(),
            shell_started: shell_started.clone(),
            closed: closed.clone(),
        });

        Ok(Box::new(FakeShell {
            _network: stream,
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
            fail_step: self.fail_step,
            fail_resize: self.fail_resize,
            resizes,
            shell_started,
            closed,
        }))
    }
}

struct FakeShell {
    _network: NetworkStream,
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    fail_step: Option<SetupStep>,
    fail_resize: bool,
    resizes: Arc<Mutex<Vec<(u32, u32)>>>,
    shell_started: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
}

impl FakeShell {
    fn check(&self, step: SetupStep) -> GatewayResult<()> {
        if self.fail_step == Some(step) {
            return Err(GatewayError::Other(format!("injected {step} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl ShellSession for FakeShell {
    fn stdin_pipe(&mut self) -> GatewayResult<ShellWriter> {
        self.check(SetupStep::StdinPipe)?;
        let pipe = self.stdin.take().ok_or_else(|| GatewayError::Other("taken".into()))?;
        Ok(Box::new(pipe))
    }

    fn stdout_pipe(&mut self) -> GatewayResult<ShellReader> {
        self.check(SetupStep::OutputPipe)?;
        let pipe = self.stdout.take().ok_or_else(|| GatewayError::Other("taken".into()))?;
        Ok(Box::new(pipe))
    }

    fn stderr_pipe(&mut self) -> GatewayResult<ShellReader> {
        let pipe = self.stderr.take().ok_or_else(|| GatewayError::Other("taken".into()))?;
        Ok(Box::new(pipe))
    }

    async fn shell(&mut self) -> GatewayResult<()> {
        self.check(SetupStep::Shell)?;
        self.shell_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn window_change(&mut self, rows: u32, cols: u32) -> GatewayResult<()> {
        if self.fail_resize {
            return Err(GatewayError::Remote("resize: injected failure".into()));
        }
        self.resizes.lock().unwrap().push((rows, cols));
        Ok(())
    }

    async fn close(&mut self) -> GatewayResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
