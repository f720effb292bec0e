//! webssh-core: Shared protocol library for the SSH-over-WebSocket gateway.
//!
//! Provides the message envelope types, the JSON/CBOR envelope codec, the
//! gateway error taxonomy, and the abstract transport-endpoint trait.

pub mod codec;
pub mod error;
pub mod messages;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{decode_cbor, decode_frame, decode_json, encode_cbor, encode_json, EncodedFrame, WireFormat};
pub use error::{GatewayError, GatewayResult, SetupStep};
pub use messages::{Envelope, MessageType, DEFAULT_COLS, DEFAULT_ROWS};
pub use transport::{MemoryPeer, MemoryTransport, TransportEndpoint};
