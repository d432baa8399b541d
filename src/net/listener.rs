//! Plaintext listener boundary and its TCP implementation.
//!
//! # Responsibilities
//! - Define the listener contract the secure server consumes
//! - Bind to the configured address
//! - Accept incoming TCP connections in a background task
//! - Enforce max_connections limit via semaphore
//! - Record TLS options applied to the transport before first use

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};

use crate::config::validation::validate_option;
use crate::config::{ListenerConfig, OptionValue, TlsOptions};
use crate::error::ListenerError;
use crate::net::connection::{Connection, TcpConnection};

/// Event produced by a plaintext listener.
#[derive(Debug)]
pub enum ListenerEvent<C> {
    /// A new plaintext connection.
    Connection(C),
    /// A listener-level failure. Does not end the stream.
    Error(ListenerError),
}

/// Lazy, unbounded, non-restartable listener event stream.
pub type ListenerEvents<C> = mpsc::UnboundedReceiver<ListenerEvent<C>>;

/// Rejection of a TLS option by the underlying transport.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct OptionRejected(pub String);

/// Handle to the listener's underlying transport.
pub trait Transport {
    /// Whether the transport can still accept connections.
    fn is_active(&self) -> bool;

    /// Apply one TLS option before the first accept.
    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), OptionRejected>;
}

/// A listener accepting plaintext duplex connections.
pub trait PlainListener: Send + 'static {
    type Conn: Connection;

    /// Underlying transport handle.
    fn transport(&mut self) -> &mut dyn Transport;

    /// Start delivering events. Events are produced on `runtime`.
    fn subscribe(&mut self, runtime: &Handle) -> ListenerEvents<Self::Conn>;

    /// Bound local address, `None` when unbound or closed.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Temporarily stop accepting.
    fn pause(&mut self) {}

    /// Resume accepting after `pause`.
    fn resume(&mut self) {}

    /// Stop all future events. Idempotent.
    fn close(&mut self);
}

/// Accept-loop control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptState {
    Accepting,
    Paused,
    Closed,
}

/// Transport of a [`TcpPlainListener`].
///
/// Options are type-checked and recorded in application order.
#[derive(Debug, Default)]
pub struct TcpTransport {
    active: bool,
    applied: TlsOptions,
}

impl TcpTransport {
    /// Options applied so far, in application order.
    pub fn applied(&self) -> &TlsOptions {
        &self.applied
    }
}

impl Transport for TcpTransport {
    fn is_active(&self) -> bool {
        self.active
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), OptionRejected> {
        if !self.active {
            return Err(OptionRejected("transport is closed".to_string()));
        }
        validate_option(name, value).map_err(|e| OptionRejected(e.to_string()))?;
        self.applied.insert(name, value.clone());
        Ok(())
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// accepting waits until a connection is dropped.
pub struct TcpPlainListener {
    /// The underlying TCP listener, moved into the accept loop on subscribe.
    inner: Option<TcpListener>,
    local_addr: SocketAddr,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
    transport: TcpTransport,
    control: watch::Sender<AcceptState>,
}

impl TcpPlainListener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Self::from_listener(listener, config.max_connections)
    }

    /// Wrap an already bound Tokio listener.
    pub fn from_listener(listener: TcpListener, max_connections: usize) -> Result<Self, ListenerError> {
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections,
            "Listener bound"
        );

        let (control, _) = watch::channel(AcceptState::Accepting);
        Ok(Self {
            inner: Some(listener),
            local_addr,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            transport: TcpTransport {
                active: true,
                applied: TlsOptions::new(),
            },
            control,
        })
    }

    /// Options recorded on the transport.
    pub fn applied_options(&self) -> &TlsOptions {
        self.transport.applied()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl PlainListener for TcpPlainListener {
    type Conn = TcpConnection;

    fn transport(&mut self) -> &mut dyn Transport {
        &mut self.transport
    }

    fn subscribe(&mut self, runtime: &Handle) -> ListenerEvents<TcpConnection> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.take() {
            Some(listener) if self.transport.active => {
                runtime.spawn(accept_loop(
                    listener,
                    Arc::clone(&self.connection_limit),
                    self.control.subscribe(),
                    tx,
                ));
            }
            _ => {
                tracing::warn!(address = %self.local_addr, "Listener already subscribed or closed");
            }
        }
        rx
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.active.then_some(self.local_addr)
    }

    fn pause(&mut self) {
        if self.transport.active {
            self.control.send_replace(AcceptState::Paused);
        }
    }

    fn resume(&mut self) {
        if self.transport.active {
            self.control.send_replace(AcceptState::Accepting);
        }
    }

    fn close(&mut self) {
        if !self.transport.active {
            return;
        }
        self.transport.active = false;
        self.inner = None;
        self.control.send_replace(AcceptState::Closed);
        tracing::info!(address = %self.local_addr, "Listener closed");
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

async fn accept_loop(
    listener: TcpListener,
    limit: Arc<Semaphore>,
    mut control: watch::Receiver<AcceptState>,
    tx: mpsc::UnboundedSender<ListenerEvent<TcpConnection>>,
) {
    loop {
        let state = *control.borrow_and_update();
        match state {
            AcceptState::Closed => break,
            AcceptState::Paused => {
                tokio::select! {
                    changed = control.changed() => if changed.is_err() { break },
                    _ = tx.closed() => break,
                }
                continue;
            }
            AcceptState::Accepting => {}
        }

        // Acquire permit first (backpressure)
        let permit = tokio::select! {
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            changed = control.changed() => {
                if changed.is_err() { break }
                continue;
            }
            _ = tx.closed() => break,
        };

        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(
                        peer_addr = %peer,
                        available_permits = limit.available_permits(),
                        "Connection accepted"
                    );
                    let conn = TcpConnection::new(stream, peer, ConnectionPermit { _permit: permit });
                    if tx.send(ListenerEvent::Connection(conn)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    drop(permit);
                    if tx.send(ListenerEvent::Error(ListenerError::Accept(e))).is_err() {
                        break;
                    }
                    // Avoid spinning when the process is out of descriptors.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            changed = control.changed() => if changed.is_err() { break },
            _ = tx.closed() => break,
        }
    }
    tracing::debug!("Accept loop stopped");
}
