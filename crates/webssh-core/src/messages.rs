//! Message envelopes exchanged over the transport endpoint.
//!
//! Client-originated types (`login`, `password`, `publickey`, `stdin`,
//! `resize`) flow into the gateway; `stdout` and `stderr` flow out.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default terminal width requested when a shell session starts.
pub const DEFAULT_COLS: u32 = 80;
/// Default terminal height requested when a shell session starts.
pub const DEFAULT_ROWS: u32 = 40;

/// Envelope type tag. Serialized as its lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Login,
    Password,
    Publickey,
    Stdin,
    Resize,
    Stdout,
    Stderr,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        Self::Login,
        Self::Password,
        Self::Publickey,
        Self::Stdin,
        Self::Resize,
        Self::Stdout,
        Self::Stderr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Password => "password",
            Self::Publickey => "publickey",
            Self::Stdin => "stdin",
            Self::Resize => "resize",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    /// Whether a client is expected to send this type (as opposed to the
    /// gateway pushing it).
    pub fn is_client_originated(&self) -> bool {
        !matches!(self, Self::Stdout | Self::Stderr)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The typed unit exchanged over the transport endpoint.
///
/// `data` carries a username, a password, or raw terminal bytes depending on
/// the type. `rows`/`cols` only mean something for [`MessageType::Resize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    #[serde(default, with = "data_field")]
    pub data: Vec<u8>,

    #[serde(default)]
    pub rows: u32,

    #[serde(default)]
    pub cols: u32,
}

impl Envelope {
    pub fn new(msg_type: MessageType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_type,
            data: data.into(),
            rows: 0,
            cols: 0,
        }
    }

    pub fn login(username: &str) -> Self {
        Self::new(MessageType::Login, username.as_bytes())
    }

    pub fn password(password: &str) -> Self {
        Self::new(MessageType::Password, password.as_bytes())
    }

    pub fn publickey() -> Self {
        Self::new(MessageType::Publickey, Vec::new())
    }

    pub fn stdin(data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::Stdin, data)
    }

    pub fn resize(rows: u32, cols: u32) -> Self {
        Self {
            msg_type: MessageType::Resize,
            data: Vec::new(),
            rows,
            cols,
        }
    }

    /// An outbound chunk of shell output, tagged with its source stream.
    pub fn output(msg_type: MessageType, chunk: &[u8]) -> Self {
        debug_assert!(!msg_type.is_client_originated());
        Self::new(msg_type, chunk.to_vec())
    }

    /// `data` as text (usernames and passwords). Invalid UTF-8 is an error,
    /// never rewritten.
    pub fn data_str(&self) -> GatewayResult<String> {
        String::from_utf8(self.data.clone())
            .map_err(|e| GatewayError::Codec(format!("{} data is not UTF-8: {e}", self.msg_type)))
    }
}

/// `data` is base64 text in human-readable formats (JSON) and a native byte
/// string in binary formats (CBOR).
mod data_field {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&STANDARD.encode(data))
        } else {
            serializer.serialize_bytes(data)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(Base64Visitor)
        } else {
            deserializer.deserialize_byte_buf(BytesVisitor)
        }
    }

    struct Base64Visitor;

    impl<'de> Visitor<'de> for Base64Visitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a base64 string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Vec<u8>, E> {
            STANDARD.decode(v).map_err(E::custom)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Vec<u8>, E> {
            Ok(Vec::new())
        }
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }
}
