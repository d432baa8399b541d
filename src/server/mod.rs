//! Secure accept server.
//!
//! # Data Flow
//! ```text
//! SecureServer::new
//!     → listener transport active? (else ConfigurationError)
//!     → default passphrase, apply every option to the transport
//!     → subscribe to listener events, spawn driver
//!
//! driver (one task per server)
//!     ListenerEvent::Connection(plain)
//!         → attempt.rs (Accepted → Handshaking), spawned into a JoinSet
//!         → Handshake::upgrade(plain, options)
//!             ok   → Secured: Incoming receives the secure connection
//!                    (dropped while nobody has taken Incoming)
//!             err  → Failed: error subscribers notified, then plain closed
//!     ListenerEvent::Error(err) → error subscribers, verbatim
//! ```
//!
//! # Design Decisions
//! - Each handshake runs in its own task; completion order is free
//! - No cap on concurrent handshakes; backpressure belongs to the listener
//! - After close, late outcomes are dropped silently: secured connections are
//!   dropped, failed plaintext connections are still closed

mod attempt;
mod events;

pub use attempt::{HandshakeAttempt, HandshakeState};
pub use events::{ErrorEvents, Incoming};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::config::TlsOptions;
use crate::error::{ConfigurationError, HandshakeError, ListenerError, ServerError};
use crate::net::connection::{self, Connection};
use crate::net::handshake::{Handshake, HandshakeFailure};
use crate::net::listener::{ListenerEvent, ListenerEvents, PlainListener};
use crate::observability::metrics;

use attempt::InFlight;
use events::Subscribers;

/// Close state shared by the server handle, the driver and attempt tasks.
#[derive(Debug)]
struct Lifecycle {
    closed: AtomicBool,
    signal: watch::Sender<bool>,
}

impl Lifecycle {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that actually closed.
    fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.signal.send_replace(true);
        }
        first
    }
}

/// TLS server wrapping a plaintext listener.
///
/// Every connection the listener accepts is upgraded in the background and
/// ends in exactly one of: a secured connection on [`Incoming`], or an error
/// on every [`ErrorEvents`] subscriber followed by closing the plaintext
/// connection.
pub struct SecureServer<L: PlainListener, S> {
    listener: Mutex<L>,
    options: Arc<TlsOptions>,
    subscribers: Arc<Subscribers<S>>,
    lifecycle: Arc<Lifecycle>,
    in_flight: watch::Receiver<usize>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<L, S> SecureServer<L, S>
where
    L: PlainListener,
    S: Send + 'static,
{
    /// Take ownership of `listener`, apply `options` to it and start upgrading
    /// accepted connections with `handshake` on `runtime`.
    ///
    /// Fails synchronously if the listener is already closed or rejects an
    /// option. Nothing is subscribed in either case.
    pub fn new<H>(
        mut listener: L,
        handshake: H,
        options: TlsOptions,
        runtime: &Handle,
    ) -> Result<Self, ConfigurationError>
    where
        H: Handshake<L::Conn, Secure = S>,
    {
        if !listener.transport().is_active() {
            return Err(ConfigurationError::ListenerClosed);
        }

        let options = Arc::new(options.with_default_passphrase());
        let transport = listener.transport();
        for (name, value) in options.iter() {
            transport
                .set_option(name, value)
                .map_err(|e| ConfigurationError::InvalidOption {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
        }

        let events = listener.subscribe(runtime);

        let subscribers = Arc::new(Subscribers::new());
        let (signal, closed_rx) = watch::channel(false);
        let lifecycle = Arc::new(Lifecycle {
            closed: AtomicBool::new(false),
            signal,
        });
        let (table, in_flight) = InFlight::new();

        let driver = Driver {
            events,
            closed: closed_rx,
            handshake: Arc::new(handshake),
            options: Arc::clone(&options),
            subscribers: Arc::clone(&subscribers),
            lifecycle: Arc::clone(&lifecycle),
            attempts: JoinSet::new(),
            table,
            runtime: runtime.clone(),
        };
        let driver = runtime.spawn(driver.run());

        tracing::info!(
            address = ?listener.local_addr(),
            options = options.len(),
            "Secure server started"
        );

        Ok(Self {
            listener: Mutex::new(listener),
            options,
            subscribers,
            lifecycle,
            in_flight,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Like [`SecureServer::new`], on the current Tokio runtime.
    ///
    /// # Panics
    /// Outside of a Tokio runtime.
    pub fn start<H>(listener: L, handshake: H, options: TlsOptions) -> Result<Self, ConfigurationError>
    where
        H: Handshake<L::Conn, Secure = S>,
    {
        Self::new(listener, handshake, options, &Handle::current())
    }

    /// The secured connection stream. Only the first call gets it.
    ///
    /// Connections secured before the stream is taken have no owner and are
    /// dropped.
    pub fn incoming(&self) -> Option<Incoming<S>> {
        self.subscribers.take_incoming()
    }

    /// Register an error subscriber.
    pub fn errors(&self) -> ErrorEvents {
        self.subscribers.subscribe_errors()
    }

    /// Effective options, passphrase default included.
    pub fn options(&self) -> &Arc<TlsOptions> {
        &self.options
    }

    /// The listener's bound address, unchanged.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.listener).local_addr()
    }

    /// Handshakes started and not yet resolved.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Stop accepting new connections until [`SecureServer::resume`].
    pub fn pause(&self) {
        lock(&self.listener).pause();
    }

    pub fn resume(&self) {
        lock(&self.listener).resume();
    }

    /// Close the listener. Idempotent.
    ///
    /// Pending handshakes still run to completion but their outcomes are no
    /// longer emitted.
    pub fn close(&self) {
        if self.lifecycle.close() {
            lock(&self.listener).close();
            tracing::info!(in_flight = self.in_flight(), "Secure server closed");
        }
    }

    /// Close and wait until every pending handshake has resolved.
    pub async fn shutdown(self) {
        self.close();
        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                tracing::error!(error = %e, "Secure server driver failed");
            }
        }
    }
}

impl<L: PlainListener, S> Drop for SecureServer<L, S> {
    fn drop(&mut self) {
        if self.lifecycle.close() {
            let listener = match self.listener.get_mut() {
                Ok(listener) => listener,
                Err(poisoned) => poisoned.into_inner(),
            };
            listener.close();
        }
    }
}

/// Consumes listener events and joins handshake tasks for one server.
struct Driver<C, H: Handshake<C>> {
    events: ListenerEvents<C>,
    closed: watch::Receiver<bool>,
    handshake: Arc<H>,
    options: Arc<TlsOptions>,
    subscribers: Arc<Subscribers<H::Secure>>,
    lifecycle: Arc<Lifecycle>,
    attempts: JoinSet<HandshakeAttempt>,
    table: InFlight,
    runtime: Handle,
}

impl<C, H> Driver<C, H>
where
    C: Connection,
    H: Handshake<C>,
{
    async fn run(mut self) {
        let mut listening = true;

        while listening || !self.attempts.is_empty() {
            tokio::select! {
                event = self.events.recv(), if listening => match event {
                    Some(ListenerEvent::Connection(conn)) => self.start(conn),
                    Some(ListenerEvent::Error(err)) => self.forward(err),
                    None => listening = false,
                },
                Some(joined) = self.attempts.join_next_with_id() => self.finish(joined),
                changed = self.closed.changed(), if listening => {
                    // Sender lives in the server handle; an error means it is gone.
                    if changed.is_err() || *self.closed.borrow() {
                        listening = false;
                    }
                }
            }
        }

        // Anything the listener queued after close is dropped (and closed) here.
        self.events.close();
        self.subscribers.finish();
        tracing::debug!("Secure server driver stopped");
    }

    fn start(&mut self, conn: C) {
        if self.lifecycle.is_closed() {
            tracing::debug!(connection_id = %conn.id(), "Server closed; dropping accepted connection");
            return;
        }

        let mut attempt = HandshakeAttempt::accepted(conn.id(), conn.peer_addr());
        tracing::debug!(
            connection_id = %attempt.connection_id(),
            peer_addr = ?attempt.peer(),
            "Starting TLS handshake"
        );
        attempt.begin();

        let task = run_attempt(
            attempt,
            conn,
            Arc::clone(&self.handshake),
            Arc::clone(&self.options),
            Arc::clone(&self.subscribers),
            Arc::clone(&self.lifecycle),
        );
        let handle = self.attempts.spawn_on(task, &self.runtime);
        self.table.insert(handle.id(), attempt);
    }

    fn forward(&self, err: ListenerError) {
        tracing::warn!(error = %err, "Listener error");
        metrics::record_listener_error();
        if !self.lifecycle.is_closed() {
            self.subscribers.emit_error(ServerError::Listener(err));
        }
    }

    fn finish(&mut self, joined: Result<(tokio::task::Id, HandshakeAttempt), JoinError>) {
        match joined {
            Ok((id, resolved)) => {
                self.table.remove(id);
                metrics::record_handshake(resolved.state(), resolved.elapsed());
            }
            Err(e) => {
                // The task died before resolving; its connection was dropped with it.
                let Some(mut attempt) = self.table.remove(e.id()) else {
                    return;
                };
                attempt.fail();
                metrics::record_handshake(attempt.state(), attempt.elapsed());
                let err = ServerError::Handshake {
                    remote: attempt.peer(),
                    source: HandshakeError::Aborted,
                };
                tracing::error!(
                    connection_id = %attempt.connection_id(),
                    panicked = e.is_panic(),
                    "TLS handshake task aborted"
                );
                if !self.lifecycle.is_closed() {
                    self.subscribers.emit_error(err);
                }
            }
        }
    }
}

/// One connection from `Handshaking` to a terminal state.
async fn run_attempt<C, H>(
    mut attempt: HandshakeAttempt,
    conn: C,
    handshake: Arc<H>,
    options: Arc<TlsOptions>,
    subscribers: Arc<Subscribers<H::Secure>>,
    lifecycle: Arc<Lifecycle>,
) -> HandshakeAttempt
where
    C: Connection,
    H: Handshake<C>,
{
    match handshake.upgrade(conn, options).await {
        Ok(secure) => {
            attempt.secure();
            tracing::debug!(
                connection_id = %attempt.connection_id(),
                elapsed = ?attempt.elapsed(),
                "TLS handshake complete"
            );
            if lifecycle.is_closed() {
                tracing::debug!(connection_id = %attempt.connection_id(), "Server closed; dropping secured connection");
            } else if let Err(secure) = subscribers.emit_connection(secure) {
                tracing::warn!(connection_id = %attempt.connection_id(), "No connection consumer; dropping secured connection");
                drop(secure);
            }
        }
        Err(HandshakeFailure { error, conn, owner }) => {
            attempt.fail();
            let err = ServerError::Handshake {
                remote: attempt.peer(),
                source: error,
            };
            tracing::warn!(connection_id = %attempt.connection_id(), error = %err, "TLS handshake failed");
            if !lifecycle.is_closed() {
                subscribers.emit_error(err);
            }
            if let Some(conn) = conn {
                connection::close(conn).await;
            }
            // Releases a connection the primitive could not hand back directly.
            drop(owner);
        }
    }
    attempt
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
