//! Error taxonomy for the secure accept layer.
//!
//! # Scopes
//! - `ConfigurationError`: construction only, returned synchronously
//! - `ListenerError`: produced by the plaintext listener, forwarded verbatim
//! - `HandshakeError`: one connection's negotiation failure
//! - `ServerError`: what error subscribers actually receive

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Construction-time failure. The server is never usable after one of these.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The listener's underlying transport was already inactive.
    #[error("listener is already closed")]
    ListenerClosed,

    /// The underlying transport rejected a TLS option.
    #[error("invalid TLS option `{name}`: {reason}")]
    InvalidOption { name: String, reason: String },
}

/// Listener-level failure, non-fatal to the server as a whole.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// Negotiation failure for a single connection.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The TLS negotiation itself failed (protocol or certificate mismatch, peer abort).
    #[error("{0}")]
    Tls(#[source] std::io::Error),

    /// The primitive could not build a TLS context from the applied options.
    #[error("invalid TLS context: {0}")]
    Config(String),

    /// Negotiation did not finish within the allowed time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The attempt task ended without resolving (panic or cancellation).
    #[error("handshake aborted")]
    Aborted,

    /// Failure reported by a custom handshake primitive.
    #[error("{0}")]
    Other(String),
}

/// Error delivered to the server's error subscribers.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Forwarded verbatim from the plaintext listener.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// A single connection failed to negotiate TLS.
    #[error("connection from {} failed during TLS handshake: {source}", display_remote(.remote))]
    Handshake {
        remote: Option<SocketAddr>,
        #[source]
        source: HandshakeError,
    },
}

impl ServerError {
    /// The handshake error, if this is a per-connection failure.
    pub fn as_handshake(&self) -> Option<&HandshakeError> {
        match self {
            ServerError::Handshake { source, .. } => Some(source),
            ServerError::Listener(_) => None,
        }
    }
}

fn display_remote(remote: &Option<SocketAddr>) -> String {
    match remote {
        Some(addr) => addr.to_string(),
        None => "unknown peer".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_error_message_names_peer() {
        let err = ServerError::Handshake {
            remote: Some("127.0.0.1:4433".parse().unwrap()),
            source: HandshakeError::Other("cert mismatch".into()),
        };
        assert_eq!(
            err.to_string(),
            "connection from 127.0.0.1:4433 failed during TLS handshake: cert mismatch"
        );
    }

    #[test]
    fn handshake_error_without_peer() {
        let err = ServerError::Handshake {
            remote: None,
            source: HandshakeError::Aborted,
        };
        assert!(err.to_string().starts_with("connection from unknown peer"));
        assert!(matches!(err.as_handshake(), Some(HandshakeError::Aborted)));
    }
}
