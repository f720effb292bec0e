//! Envelope codec.
//!
//! Text frames carry JSON (`data` base64-encoded), binary frames carry CBOR
//! (`data` as a byte string). Both forms use the field names
//! `type`, `data`, `rows`, `cols`.

use crate::error::{GatewayError, GatewayResult};
use crate::messages::Envelope;
use serde::Deserialize;
use std::io::Cursor;

/// Encoding used for outbound envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    Cbor,
}

impl std::str::FromStr for WireFormat {
    type Err = GatewayError;

    fn from_str(s: &str) -> GatewayResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "cbor" => Ok(Self::Cbor),
            other => Err(GatewayError::Other(format!("unknown wire format: {other}"))),
        }
    }
}

/// An encoded envelope, ready to be put on a message transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl WireFormat {
    pub fn encode(&self, envelope: &Envelope) -> GatewayResult<EncodedFrame> {
        match self {
            Self::Json => encode_json(envelope).map(EncodedFrame::Text),
            Self::Cbor => encode_cbor(envelope).map(EncodedFrame::Binary),
        }
    }
}

/// Decode a frame using the encoding implied by its kind.
pub fn decode_frame(frame: &EncodedFrame) -> GatewayResult<Envelope> {
    match frame {
        EncodedFrame::Text(text) => decode_json(text),
        EncodedFrame::Binary(bytes) => decode_cbor(bytes),
    }
}

pub fn encode_json(envelope: &Envelope) -> GatewayResult<String> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode_json(text: &str) -> GatewayResult<Envelope> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_cbor(envelope: &Envelope) -> GatewayResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(envelope, &mut payload)?;
    Ok(payload)
}

pub fn decode_cbor(data: &[u8]) -> GatewayResult<Envelope> {
    let cursor = Cursor::new(data);
    let envelope: Envelope = ciborium::from_reader(cursor)?;
    Ok(envelope)
}
