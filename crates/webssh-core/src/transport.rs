//! Abstract transport endpoint for the gateway.
//!
//! A transport endpoint delivers discrete envelopes in order and accepts
//! envelopes going back to the client. The bridge reads from it while the
//! output relay writes to it from other tasks, so implementations take
//! `&self` and serialize writes internally.

use crate::error::{GatewayError, GatewayResult};
use crate::messages::Envelope;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

#[async_trait]
pub trait TransportEndpoint: Send + Sync {
    /// Receive the next envelope. Blocks until one arrives; a closed or
    /// broken connection and a malformed frame are both errors.
    async fn read_envelope(&self) -> GatewayResult<Envelope>;

    /// Send one envelope to the client.
    async fn write_envelope(&self, envelope: &Envelope) -> GatewayResult<()>;

    /// Close the endpoint. Safe to call more than once.
    async fn close(&self) -> GatewayResult<()>;
}

/// In-process transport endpoint backed by channels.
///
/// Useful for embedding the gateway behind a custom message transport and
/// for driving a bridge from tests.
pub struct MemoryTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    outbound: mpsc::UnboundedSender<Envelope>,
    closed: watch::Sender<bool>,
}

/// The client side of a [`MemoryTransport`].
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Envelope>>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    closed: watch::Receiver<bool>,
}

impl MemoryTransport {
    /// Create a connected endpoint / peer pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (client_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, client_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        (
            MemoryTransport {
                inbound: Mutex::new(inbound),
                outbound,
                closed: closed_tx,
            },
            MemoryPeer {
                tx: Some(client_tx),
                rx: client_rx,
                closed: closed_rx,
            },
        )
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl TransportEndpoint for MemoryTransport {
    async fn read_envelope(&self) -> GatewayResult<Envelope> {
        if self.is_closed() {
            return Err(GatewayError::Transport("closed".into()));
        }
        let mut inbound = self.inbound.lock().await;
        inbound
            .recv()
            .await
            .ok_or_else(|| GatewayError::Transport("peer disconnected".into()))
    }

    async fn write_envelope(&self, envelope: &Envelope) -> GatewayResult<()> {
        if self.is_closed() {
            return Err(GatewayError::Transport("closed".into()));
        }
        self.outbound
            .send(envelope.clone())
            .map_err(|_| GatewayError::Transport("peer disconnected".into()))
    }

    async fn close(&self) -> GatewayResult<()> {
        self.closed.send_replace(true);
        Ok(())
    }
}

impl MemoryPeer {
    /// Send an envelope to the gateway. Returns false once the gateway side
    /// has gone away.
    pub fn send(&self, envelope: Envelope) -> bool {
        match &self.tx {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Receive the next envelope pushed by the gateway.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Simulate the client going away.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    /// Whether the gateway side closed the endpoint.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the gateway side closes the endpoint.
    pub async fn closed(&mut self) {
        let _ = self.closed.wait_for(|closed| *closed).await;
    }
}
