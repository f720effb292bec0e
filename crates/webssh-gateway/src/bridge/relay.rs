//! Output relay: shell stdout/stderr to outbound envelopes.
//!
//! One copier task per stream. Each read becomes exactly one envelope, so
//! chunk boundaries and per-stream order are preserved; the two streams are
//! not ordered against each other. A copier stops quietly on EOF, a read
//! error, or a transport write error. Tearing the session down aborts both.

use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::debug;
use webssh_core::{Envelope, MessageType, TransportEndpoint};

use crate::ssh::ShellReader;

/// Handles to the two copier tasks of one session.
pub struct OutputRelay {
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl OutputRelay {
    /// Spawn the stdout and stderr copiers.
    pub fn start(
        session_id: &str,
        transport: Arc<dyn TransportEndpoint>,
        stdout: ShellReader,
        stderr: ShellReader,
        buffer_size: usize,
    ) -> Self {
        debug!(session_id = %session_id, "transfer");
        Self {
            stdout: tokio::spawn(copy_to_envelopes(
                session_id.to_string(),
                MessageType::Stdout,
                stdout,
                transport.clone(),
                buffer_size,
            )),
            stderr: tokio::spawn(copy_to_envelopes(
                session_id.to_string(),
                MessageType::Stderr,
                stderr,
                transport,
                buffer_size,
            )),
        }
    }

    /// Whether both copiers have stopped.
    pub fn is_finished(&self) -> bool {
        self.stdout.is_finished() && self.stderr.is_finished()
    }

    /// Abort both copiers.
    pub fn stop(&self) {
        self.stdout.abort();
        self.stderr.abort();
    }
}

impl Drop for OutputRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn copy_to_envelopes(
    session_id: String,
    msg_type: MessageType,
    mut reader: ShellReader,
    transport: Arc<dyn TransportEndpoint>,
    buffer_size: usize,
) {
    debug!(session_id = %session_id, stream = %msg_type, "copy to");
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(session_id = %session_id, stream = %msg_type, "eof");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(session_id = %session_id, stream = %msg_type, error = %e, "read fail");
                return;
            }
        };
        let envelope = Envelope::output(msg_type, &buf[..n]);
        if let Err(e) = transport.write_envelope(&envelope).await {
            debug!(session_id = %session_id, stream = %msg_type, error = %e, "write fail");
            return;
        }
    }
}
