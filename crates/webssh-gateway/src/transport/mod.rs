//! Concrete transport endpoints.

pub mod websocket;

pub use websocket::WebSocketEndpoint;
