//! WebSocket transport endpoint using tokio-tungstenite.
//!
//! Text frames decode as JSON envelopes, binary frames as CBOR envelopes.
//! Outbound envelopes use the configured [`WireFormat`]. The socket is
//! split so the bridge can block on reads while relay copiers write.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use webssh_core::{
    decode_frame, EncodedFrame, Envelope, GatewayError, GatewayResult, TransportEndpoint,
    WireFormat,
};

/// Maximum accepted frame size (1 MiB).
const MAX_WS_FRAME_SIZE: usize = 1_048_576;

pub struct WebSocketEndpoint<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    format: WireFormat,
    closed: AtomicBool,
}

impl<S> WebSocketEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>, format: WireFormat) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            format,
            closed: AtomicBool::new(false),
        }
    }

    async fn send(&self, message: Message) -> GatewayResult<()> {
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| GatewayError::Transport(format!("WS send failed: {e}")))
    }
}

fn check_size(len: usize) -> GatewayResult<()> {
    if len > MAX_WS_FRAME_SIZE {
        return Err(GatewayError::Codec(format!(
            "WS frame too large: {len} bytes (max {MAX_WS_FRAME_SIZE})"
        )));
    }
    Ok(())
}

#[async_trait]
impl<S> TransportEndpoint for WebSocketEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_envelope(&self) -> GatewayResult<Envelope> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    check_size(text.len())?;
                    return decode_frame(&EncodedFrame::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    check_size(data.len())?;
                    return decode_frame(&EncodedFrame::Binary(data));
                }
                // tungstenite queues the pong for pings itself.
                Some(Ok(Message::Close(_))) | None => {
                    return Err(GatewayError::Transport("closed by peer".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(GatewayError::Transport(format!("WS recv failed: {e}")));
                }
            }
        }
    }

    async fn write_envelope(&self, envelope: &Envelope) -> GatewayResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("closed".into()));
        }
        let message = match self.format.encode(envelope)? {
            EncodedFrame::Text(text) => Message::Text(text.into()),
            EncodedFrame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.send(message).await
    }

    async fn close(&self) -> GatewayResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "WS close failed");
        }
        Ok(())
    }
}
