//! Per-connection handshake attempts.
//!
//! # States
//! ```text
//! Accepted → Handshaking → Secured
//!                        → Failed
//! ```
//!
//! `Accepted` and `Handshaking` are transient. Reaching `Secured` or `Failed`
//! removes the attempt from the in-flight table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task;

use crate::net::ConnectionId;
use crate::observability::metrics;

/// Handshake state of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Accepted by the listener, handshake not started.
    Accepted,
    /// Handshake primitive invoked.
    Handshaking,
    /// Secured connection delivered (or dropped after close).
    Secured,
    /// Negotiation failed; plaintext connection closed.
    Failed,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Secured | HandshakeState::Failed)
    }

    fn as_str(self) -> &'static str {
        match self {
            HandshakeState::Accepted => "accepted",
            HandshakeState::Handshaking => "handshaking",
            HandshakeState::Secured => "secured",
            HandshakeState::Failed => "failed",
        }
    }
}

/// One connection's way through the handshake.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeAttempt {
    connection_id: ConnectionId,
    peer: Option<SocketAddr>,
    started: Instant,
    state: HandshakeState,
}

impl HandshakeAttempt {
    /// Record a freshly accepted connection.
    ///
    /// The peer address is captured here because the connection may already
    /// be gone when the handshake fails.
    pub fn accepted(connection_id: ConnectionId, peer: Option<SocketAddr>) -> Self {
        Self {
            connection_id,
            peer,
            started: Instant::now(),
            state: HandshakeState::Accepted,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn begin(&mut self) {
        self.transition(HandshakeState::Accepted, HandshakeState::Handshaking);
    }

    pub(crate) fn secure(&mut self) {
        self.transition(HandshakeState::Handshaking, HandshakeState::Secured);
    }

    pub(crate) fn fail(&mut self) {
        self.transition(HandshakeState::Handshaking, HandshakeState::Failed);
    }

    fn transition(&mut self, from: HandshakeState, to: HandshakeState) {
        debug_assert_eq!(self.state, from, "illegal handshake transition to {to:?}");
        tracing::trace!(
            connection_id = %self.connection_id,
            from = from.as_str(),
            to = to.as_str(),
            "Handshake state change"
        );
        self.state = to;
    }
}

/// Attempts currently being negotiated, keyed by their task.
#[derive(Debug)]
pub(crate) struct InFlight {
    attempts: HashMap<task::Id, HandshakeAttempt>,
    count: watch::Sender<usize>,
}

impl InFlight {
    pub(crate) fn new() -> (Self, watch::Receiver<usize>) {
        let (count, rx) = watch::channel(0);
        (
            Self {
                attempts: HashMap::new(),
                count,
            },
            rx,
        )
    }

    pub(crate) fn insert(&mut self, id: task::Id, attempt: HandshakeAttempt) {
        self.attempts.insert(id, attempt);
        self.publish();
    }

    pub(crate) fn remove(&mut self, id: task::Id) -> Option<HandshakeAttempt> {
        let attempt = self.attempts.remove(&id);
        self.publish();
        attempt
    }

    pub(crate) fn len(&self) -> usize {
        self.attempts.len()
    }

    fn publish(&self) {
        let n = self.attempts.len();
        self.count.send_replace(n);
        metrics::record_in_flight(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_path() {
        let mut attempt = HandshakeAttempt::accepted(ConnectionId::new(), None);
        assert_eq!(attempt.state(), HandshakeState::Accepted);
        attempt.begin();
        assert!(!attempt.state().is_terminal());
        attempt.secure();
        assert_eq!(attempt.state(), HandshakeState::Secured);
        assert!(attempt.state().is_terminal());
    }

    #[test]
    fn failure_path_keeps_peer() {
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();
        let mut attempt = HandshakeAttempt::accepted(ConnectionId::new(), Some(peer));
        attempt.begin();
        attempt.fail();
        assert_eq!(attempt.state(), HandshakeState::Failed);
        assert_eq!(attempt.peer(), Some(peer));
    }

    #[test]
    #[should_panic(expected = "illegal handshake transition")]
    #[cfg(debug_assertions)]
    fn cannot_secure_before_handshaking() {
        let mut attempt = HandshakeAttempt::accepted(ConnectionId::new(), None);
        attempt.secure();
    }

    #[tokio::test]
    async fn in_flight_count_is_published() {
        let (mut table, rx) = InFlight::new();
        let task = tokio::spawn(async {});
        let id = task.id();

        table.insert(id, HandshakeAttempt::accepted(ConnectionId::new(), None));
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(table.len(), 1);

        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert_eq!(*rx.borrow(), 0);
    }
}
