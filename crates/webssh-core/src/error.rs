use std::fmt;
use thiserror::Error;

/// Session setup step that failed after authentication succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Pty,
    StdinPipe,
    OutputPipe,
    Shell,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pty => "pty",
            Self::StdinPipe => "stdin",
            Self::OutputPipe => "stdout & stderr",
            Self::Shell => "shell",
        };
        f.write_str(name)
    }
}

/// Errors produced by the gateway. Every variant is fatal to the one
/// session that raised it and to nothing else.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("unsupported auth method: {0}")]
    UnsupportedAuth(&'static str),

    #[error("setup failed ({step}): {reason}")]
    Setup { step: SetupStep, reason: String },

    #[error("remote write failed: {0}")]
    Remote(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn setup(step: SetupStep, reason: impl fmt::Display) -> Self {
        GatewayError::Setup {
            step,
            reason: reason.to_string(),
        }
    }
}

impl From<ciborium::de::Error<std::io::Error>> for GatewayError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        GatewayError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for GatewayError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        GatewayError::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Codec(e.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
