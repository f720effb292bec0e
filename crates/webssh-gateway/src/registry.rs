//! Session registry: pairs the two half-connections of a session.
//!
//! Keyed by session identifier with per-key load-or-store semantics. The
//! first registration for an identifier stores its endpoint; the
//! registration that brings the complementary endpoint takes the pair out
//! and leaves a tombstone, so exactly one caller ever sees
//! [`RegisterOutcome::Paired`] for a given identifier.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Which half of a session an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Transport,
    Network,
}

/// One half of a session.
pub enum Endpoint<T, N> {
    Transport(T),
    Network(N),
}

impl<T, N> Endpoint<T, N> {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Transport(_) => EndpointKind::Transport,
            Self::Network(_) => EndpointKind::Network,
        }
    }
}

/// Both halves of a session, ready for bridging.
pub struct EndpointPair<T, N> {
    pub transport: T,
    pub network: N,
}

/// Result of a registration.
pub enum RegisterOutcome<T, N> {
    /// First half for this identifier; stored until its partner arrives.
    Stored,
    /// This call completed the pair. The caller launches the bridge.
    Paired(EndpointPair<T, N>),
    /// The identifier already launched, or the same kind of endpoint is
    /// already waiting. The surplus endpoint is handed back untouched.
    Rejected(Endpoint<T, N>),
}

enum Slot<T, N> {
    Pending { half: Endpoint<T, N>, since: Instant },
    Launched,
}

/// Concurrent map from session identifier to pending endpoint.
pub struct SessionRegistry<T, N> {
    slots: DashMap<String, Slot<T, N>>,
}

impl<T, N> Default for SessionRegistry<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, N> SessionRegistry<T, N> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Register one half of session `id`.
    ///
    /// Linearizable per identifier: the shard lock is held for the whole
    /// load-or-store, so racing halves resolve to one `Stored` and one
    /// `Paired`.
    pub fn register(&self, id: &str, endpoint: Endpoint<T, N>) -> RegisterOutcome<T, N> {
        match self.slots.entry(id.to_string()) {
            Entry::Vacant(vacant) => {
                debug!(session_id = %id, kind = ?endpoint.kind(), "first half registered");
                vacant.insert(Slot::Pending {
                    half: endpoint,
                    since: Instant::now(),
                });
                RegisterOutcome::Stored
            }
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                match &*slot {
                    Slot::Launched => return RegisterOutcome::Rejected(endpoint),
                    Slot::Pending { half, .. } if half.kind() == endpoint.kind() => {
                        return RegisterOutcome::Rejected(endpoint)
                    }
                    Slot::Pending { .. } => {}
                }

                let previous = std::mem::replace(slot, Slot::Launched);
                let Slot::Pending { half, .. } = previous else {
                    return RegisterOutcome::Rejected(endpoint);
                };
                debug!(session_id = %id, "pair completed");
                match (half, endpoint) {
                    (Endpoint::Transport(transport), Endpoint::Network(network))
                    | (Endpoint::Network(network), Endpoint::Transport(transport)) => {
                        RegisterOutcome::Paired(EndpointPair { transport, network })
                    }
                    (_, surplus) => RegisterOutcome::Rejected(surplus),
                }
            }
        }
    }

    /// Drop halves that waited longer than `max_age` for a partner and
    /// return them so the caller can close them. Tombstones of launched
    /// sessions are never removed: an identifier bridges at most once.
    pub fn sweep(&self, max_age: Duration) -> Vec<(String, Endpoint<T, N>)> {
        let is_stale = |slot: &Slot<T, N>| match slot {
            Slot::Pending { since, .. } => since.elapsed() > max_age,
            Slot::Launched => false,
        };
        let stale: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::new();
        for id in stale {
            let removed = self.slots.remove_if(&id, |_, slot| is_stale(slot));
            if let Some((id, Slot::Pending { half, .. })) = removed {
                expired.push((id, half));
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "sweep removed unpaired endpoints");
        }
        expired
    }

    /// Identifiers with one half waiting.
    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Pending { .. }))
            .count()
    }

    /// Identifiers whose bridge has been launched.
    pub fn launched_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Launched))
            .count()
    }
}
