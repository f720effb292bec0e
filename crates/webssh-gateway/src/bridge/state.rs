//! Bridge protocol states and the (state, message type) transition table.

use std::fmt;
use webssh_core::MessageType;

/// Phase of a session bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Accumulating credentials; no SSH session yet.
    Unauthenticated,
    /// Authenticated with a pty; pipes and shell being set up. Transient:
    /// no message is read in this state.
    ShellStarting,
    /// Shell running; keystrokes and resizes are forwarded.
    Active,
    /// Torn down.
    Terminated,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::ShellStarting => "shell-starting",
            Self::Active => "active",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What the bridge does with one inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RecordUsername,
    Authenticate,
    RejectUnsupported,
    ForwardStdin,
    ForwardResize,
    /// Drop the envelope, log the reason, keep the session open.
    Discard(&'static str),
}

/// Transition table. Every (state, type) pair has an explicit entry.
pub fn transition(state: BridgeState, msg_type: MessageType) -> Action {
    use BridgeState::*;
    use MessageType::*;

    match (state, msg_type) {
        (_, Publickey) => Action::RejectUnsupported,
        (_, Stdout | Stderr) => Action::Discard("gateway-originated type sent by client"),

        (Unauthenticated, Login) => Action::RecordUsername,
        (Unauthenticated, Password) => Action::Authenticate,
        (Unauthenticated, Stdin) => Action::Discard("stdin wait login"),
        (Unauthenticated, Resize) => Action::Discard("resize wait session"),

        (Active, Stdin) => Action::ForwardStdin,
        (Active, Resize) => Action::ForwardResize,
        (Active, Login | Password) => Action::Discard("already authenticated"),

        (ShellStarting | Terminated, Login | Password | Stdin | Resize) => {
            Action::Discard("session not accepting input")
        }
    }
}
