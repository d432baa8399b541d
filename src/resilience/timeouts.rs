//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap a handshake primitive with a deadline
//! - Cancel the negotiation cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from negotiation errors
//! - On timeout the inner future is handed back, still owning the plaintext
//!   connection, so the stream outlives the error report

use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TlsOptions;
use crate::error::HandshakeError;
use crate::net::handshake::{Handshake, HandshakeFailure, HandshakeResult};

/// Handshake primitive that fails attempts exceeding `timeout`.
#[derive(Debug, Clone)]
pub struct TimeoutHandshake<H> {
    inner: H,
    timeout: Duration,
}

impl<H> TimeoutHandshake<H> {
    pub fn new(inner: H, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<C, H> Handshake<C> for TimeoutHandshake<H>
where
    C: Send + 'static,
    H: Handshake<C>,
{
    type Secure = H::Secure;

    fn upgrade(
        &self,
        conn: C,
        options: Arc<TlsOptions>,
    ) -> BoxFuture<'static, HandshakeResult<H::Secure, C>> {
        let mut negotiation = self.inner.upgrade(conn, options);
        let timeout = self.timeout;
        Box::pin(async move {
            // Bound separately so the deadline future releases its borrow here.
            let outcome = tokio::time::timeout(timeout, &mut negotiation).await;
            match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(timeout = ?timeout, "Handshake deadline exceeded");
                    // The stalled negotiation still holds the stream; the
                    // caller drops it once the timeout has been reported.
                    Err(HandshakeFailure::owned_by(
                        HandshakeError::Timeout(timeout),
                        negotiation,
                    ))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Never;

    impl Handshake<u32> for Never {
        type Secure = u32;

        fn upgrade(&self, _conn: u32, _options: Arc<TlsOptions>) -> BoxFuture<'static, HandshakeResult<u32, u32>> {
            Box::pin(future::pending())
        }
    }

    struct Immediate;

    impl Handshake<u32> for Immediate {
        type Secure = u32;

        fn upgrade(&self, conn: u32, _options: Arc<TlsOptions>) -> BoxFuture<'static, HandshakeResult<u32, u32>> {
            Box::pin(future::ready(Ok(conn + 1)))
        }
    }

    /// Connection stand-in that records when it is dropped.
    struct Tracked(Arc<AtomicBool>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct Stall;

    impl Handshake<Tracked> for Stall {
        type Secure = ();

        fn upgrade(&self, conn: Tracked, _options: Arc<TlsOptions>) -> BoxFuture<'static, HandshakeResult<(), Tracked>> {
            Box::pin(async move {
                let _held = conn;
                future::pending::<()>().await;
                Ok::<(), HandshakeFailure<Tracked>>(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_connection_lives_until_failure_is_dropped() {
        let closed = Arc::new(AtomicBool::new(false));
        let handshake = TimeoutHandshake::new(Stall, Duration::from_secs(1));
        let failure = handshake
            .upgrade(Tracked(Arc::clone(&closed)), Arc::new(TlsOptions::new()))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, HandshakeError::Timeout(_)));
        assert!(!closed.load(Ordering::SeqCst));
        drop(failure);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_stalled_handshake() {
        let handshake = TimeoutHandshake::new(Never, Duration::from_secs(5));
        let failure = handshake
            .upgrade(7, Arc::new(TlsOptions::new()))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, HandshakeError::Timeout(d) if d == Duration::from_secs(5)));
        assert!(failure.conn.is_none());
        assert!(failure.owner.is_some());
    }

    #[tokio::test]
    async fn passes_through_fast_handshake() {
        let handshake = TimeoutHandshake::new(Immediate, Duration::from_secs(5));
        let secure = handshake.upgrade(7, Arc::new(TlsOptions::new())).await.unwrap();
        assert_eq!(secure, 8);
    }
}
