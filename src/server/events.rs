//! Subscriber side of the secure server.
//!
//! Two typed channels replace a generic emitter:
//! - secured connections go to a single consumer (`Incoming`), since each
//!   connection has exactly one owner
//! - errors fan out to every registered `ErrorEvents` subscriber

use futures_util::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::ServerError;

/// Stream of secured connections.
#[derive(Debug)]
pub struct Incoming<S> {
    rx: mpsc::UnboundedReceiver<S>,
}

impl<S> Incoming<S> {
    /// Wait for the next secured connection.
    ///
    /// Returns `None` once the server has shut down and every pending
    /// handshake has resolved.
    pub async fn accept(&mut self) -> Option<S> {
        self.rx.recv().await
    }
}

impl<S> Stream for Incoming<S> {
    type Item = S;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// One error subscriber.
#[derive(Debug)]
pub struct ErrorEvents {
    rx: mpsc::UnboundedReceiver<Arc<ServerError>>,
}

impl ErrorEvents {
    pub async fn recv(&mut self) -> Option<Arc<ServerError>> {
        self.rx.recv().await
    }

    /// Non-blocking poll, for draining in tests and shutdown paths.
    pub fn try_recv(&mut self) -> Option<Arc<ServerError>> {
        self.rx.try_recv().ok()
    }
}

impl Stream for ErrorEvents {
    type Item = Arc<ServerError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Where secured connections go.
#[derive(Debug)]
enum Sink<S> {
    /// Nobody has taken `Incoming` yet; connections are dropped.
    Untaken,
    Taken(mpsc::UnboundedSender<S>),
    /// The server has shut down.
    Finished,
}

/// Registered subscribers, shared by the server handle and its tasks.
#[derive(Debug)]
pub(crate) struct Subscribers<S> {
    connections: Mutex<Sink<S>>,
    errors: Mutex<Vec<mpsc::UnboundedSender<Arc<ServerError>>>>,
}

impl<S> Subscribers<S> {
    pub(crate) fn new() -> Self {
        Self {
            connections: Mutex::new(Sink::Untaken),
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Hand out the connection stream. Only the first call gets one; after
    /// shutdown it is already ended.
    pub(crate) fn take_incoming(&self) -> Option<Incoming<S>> {
        let mut sink = lock(&self.connections);
        match *sink {
            Sink::Untaken => {
                let (tx, rx) = mpsc::unbounded_channel();
                *sink = Sink::Taken(tx);
                Some(Incoming { rx })
            }
            Sink::Finished => {
                // The sender is dropped here, so the stream ends at once.
                let (_, rx) = mpsc::unbounded_channel();
                Some(Incoming { rx })
            }
            Sink::Taken(_) => None,
        }
    }

    /// Register a new error subscriber.
    pub(crate) fn subscribe_errors(&self) -> ErrorEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        // After finish the sender is dropped here and the stream ends at once.
        if !matches!(*lock(&self.connections), Sink::Finished) {
            lock(&self.errors).push(tx);
        }
        ErrorEvents { rx }
    }

    /// Hand a secured connection to the consumer. Gives it back if nobody listens.
    pub(crate) fn emit_connection(&self, conn: S) -> Result<(), S> {
        match &*lock(&self.connections) {
            Sink::Taken(tx) => tx.send(conn).map_err(|e| e.0),
            Sink::Untaken | Sink::Finished => Err(conn),
        }
    }

    /// Deliver an error to every live subscriber. Returns how many received it.
    pub(crate) fn emit_error(&self, error: ServerError) -> usize {
        let error = Arc::new(error);
        let mut subscribers = lock(&self.errors);
        subscribers.retain(|tx| tx.send(Arc::clone(&error)).is_ok());
        subscribers.len()
    }

    /// Drop every sender so `Incoming` and `ErrorEvents` streams end.
    pub(crate) fn finish(&self) {
        *lock(&self.connections) = Sink::Finished;
        lock(&self.errors).clear();
    }
}

// A poisoned list is still a valid list of senders.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
