//! Process-wide gateway tunables.

/// Bytes read per chunk by the output relay.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Gateway configuration, fixed before the first registration.
///
/// Diagnostics go through `tracing`; with no subscriber installed they are
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    pub buffer_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl GatewayConfig {
    /// Set the relay chunk size. Zero falls back to the default.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };
        self
    }
}
