//! Plaintext connection types.
//!
//! # Responsibilities
//! - Define what the secure server needs from an accepted connection
//! - Generate unique connection IDs for tracing
//! - Wrap accepted TCP streams together with their listener permit

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::net::listener::ConnectionPermit;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A plaintext duplex connection accepted by a listener.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Identifier used in logs.
    fn id(&self) -> ConnectionId;

    /// Remote address, if the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Gracefully end a connection and release it.
///
/// Shutdown errors are ignored: the peer may already be gone, and dropping
/// the stream closes the descriptor either way.
pub async fn close<C: AsyncWrite + Unpin>(mut conn: C) {
    if let Err(e) = conn.shutdown().await {
        tracing::trace!(error = %e, "Shutdown on close failed");
    }
    drop(conn);
}

/// An accepted TCP connection.
///
/// Holds the listener permit, so the connection slot is released only when
/// the connection (or the TLS stream wrapping it) is dropped.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    _permit: ConnectionPermit,
}

impl TcpConnection {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) -> Self {
        Self {
            stream,
            peer,
            id: ConnectionId::new(),
            _permit: permit,
        }
    }

    /// Local address of the accepted socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        tracing::trace!(connection_id = %self.id, peer_addr = %self.peer, "Connection closed");
    }
}
