//! Handshake primitive boundary.
//!
//! A primitive turns one plaintext connection into a secured one. The
//! returned future resolves exactly once. On failure it hands the plaintext
//! connection (or whatever still owns it) back, so the caller decides when
//! the stream is closed.

use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::config::TlsOptions;
use crate::error::HandshakeError;

/// Failed negotiation for one connection.
pub struct HandshakeFailure<C> {
    pub error: HandshakeError,
    /// The plaintext connection, unless the primitive no longer holds it directly.
    pub conn: Option<C>,
    /// Whatever still owns the connection when `conn` is `None`, such as an
    /// abandoned negotiation. Dropping it closes the stream, so callers drop
    /// it only after the error has been reported.
    pub owner: Option<Box<dyn Send>>,
}

impl<C> HandshakeFailure<C> {
    pub fn new(error: HandshakeError, conn: C) -> Self {
        Self {
            error,
            conn: Some(conn),
            owner: None,
        }
    }

    /// Failure where the connection is buried in `owner`.
    pub fn owned_by(error: HandshakeError, owner: impl Send + 'static) -> Self {
        Self {
            error,
            conn: None,
            owner: Some(Box::new(owner)),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for HandshakeFailure<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeFailure")
            .field("error", &self.error)
            .field("conn", &self.conn)
            .field("owner", &self.owner.is_some())
            .finish()
    }
}

/// Result of one upgrade attempt.
pub type HandshakeResult<S, C> = Result<S, HandshakeFailure<C>>;

/// Upgrades plaintext connections of type `C`.
pub trait Handshake<C>: Send + Sync + 'static {
    /// The secured connection type.
    type Secure: Send + 'static;

    /// Negotiate TLS on `conn` using `options`.
    fn upgrade(
        &self,
        conn: C,
        options: Arc<TlsOptions>,
    ) -> BoxFuture<'static, HandshakeResult<Self::Secure, C>>;
}

impl<C, H: Handshake<C> + ?Sized> Handshake<C> for Arc<H> {
    type Secure = H::Secure;

    fn upgrade(
        &self,
        conn: C,
        options: Arc<TlsOptions>,
    ) -> BoxFuture<'static, HandshakeResult<Self::Secure, C>> {
        (**self).upgrade(conn, options)
    }
}
