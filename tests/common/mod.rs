//! Shared test doubles: an in-memory listener and a scripted handshake.

#![allow(dead_code)]

use futures_util::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use secure_accept::config::{OptionValue, TlsOptions};
use secure_accept::error::{HandshakeError, ListenerError};
use secure_accept::net::connection::ConnectionId;
use secure_accept::net::handshake::{Handshake, HandshakeFailure, HandshakeResult};
use secure_accept::net::listener::{ListenerEvent, ListenerEvents, OptionRejected, Transport};
use secure_accept::{Connection, PlainListener};

static NEXT_PORT: AtomicU16 = AtomicU16::new(40_000);

/// In-memory plaintext connection.
pub struct MockConn {
    io: DuplexStream,
    id: ConnectionId,
    peer: SocketAddr,
    closed: Arc<AtomicBool>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl MockConn {
    /// Runs the close hook the first time the server shuts down or drops the stream.
    fn closing(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl Connection for MockConn {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

impl AsyncRead for MockConn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockConn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.closing();
        Pin::new(&mut this.io).poll_shutdown(cx)
    }
}

impl Drop for MockConn {
    fn drop(&mut self) {
        self.closing();
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Test-side end of a [`MockConn`].
pub struct Peer {
    pub io: DuplexStream,
    pub id: ConnectionId,
    pub addr: SocketAddr,
    closed: Arc<AtomicBool>,
}

impl Peer {
    /// Whether the server side of the connection has been released.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ListenerState {
    active: bool,
    applied: Vec<(String, OptionValue)>,
    reject: Option<String>,
    subscriptions: usize,
    sender: Option<mpsc::UnboundedSender<ListenerEvent<MockConn>>>,
    paused: bool,
    closes: usize,
}

/// Listener whose events are pushed by the test through a [`ListenerControl`].
pub struct MockListener {
    state: Arc<Mutex<ListenerState>>,
    addr: SocketAddr,
}

/// Test-side handle to a [`MockListener`].
#[derive(Clone)]
pub struct ListenerControl {
    state: Arc<Mutex<ListenerState>>,
}

impl MockListener {
    pub fn new() -> (Self, ListenerControl) {
        let state = Arc::new(Mutex::new(ListenerState {
            active: true,
            ..Default::default()
        }));
        let listener = Self {
            state: Arc::clone(&state),
            addr: "127.0.0.1:8443".parse().unwrap(),
        };
        (listener, ListenerControl { state })
    }

    /// Listener whose transport rejects the named option.
    pub fn rejecting(option: &str) -> (Self, ListenerControl) {
        let (listener, control) = Self::new();
        control.state.lock().unwrap().reject = Some(option.to_string());
        (listener, control)
    }
}

impl Transport for MockListener {
    fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), OptionRejected> {
        let mut state = self.state.lock().unwrap();
        if state.reject.as_deref() == Some(name) {
            return Err(OptionRejected("unsupported by transport".to_string()));
        }
        state.applied.push((name.to_string(), value.clone()));
        Ok(())
    }
}

impl PlainListener for MockListener {
    type Conn = MockConn;

    fn transport(&mut self) -> &mut dyn Transport {
        self
    }

    fn subscribe(&mut self, _runtime: &Handle) -> ListenerEvents<MockConn> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.subscriptions += 1;
        state.sender = Some(tx);
        rx
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().unwrap().active.then_some(self.addr)
    }

    fn pause(&mut self) {
        self.state.lock().unwrap().paused = true;
    }

    fn resume(&mut self) {
        self.state.lock().unwrap().paused = false;
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.active = false;
        state.sender = None;
        state.closes += 1;
    }
}

impl ListenerControl {
    /// Accept a new in-memory connection. Returns the peer side, and whether
    /// an event was actually delivered to a subscriber.
    pub fn connect(&self) -> (Peer, bool) {
        self.accept(None)
    }

    /// Like [`ListenerControl::connect`], running `on_close` when the server
    /// first shuts down or drops its side of the connection.
    pub fn connect_with_close_hook(&self, on_close: impl FnOnce() + Send + 'static) -> (Peer, bool) {
        self.accept(Some(Box::new(on_close)))
    }

    fn accept(&self, on_close: Option<Box<dyn FnOnce() + Send>>) -> (Peer, bool) {
        let (server_io, client_io) = tokio::io::duplex(4096);
        let closed = Arc::new(AtomicBool::new(false));
        let addr: SocketAddr = format!("10.0.0.1:{}", NEXT_PORT.fetch_add(1, Ordering::Relaxed))
            .parse()
            .unwrap();
        let conn = MockConn {
            io: server_io,
            id: ConnectionId::new(),
            peer: addr,
            closed: Arc::clone(&closed),
            on_close,
        };
        let peer = Peer {
            io: client_io,
            id: conn.id,
            addr,
            closed,
        };

        let state = self.state.lock().unwrap();
        let delivered = match (&state.sender, state.active) {
            (Some(tx), true) => tx.send(ListenerEvent::Connection(conn)).is_ok(),
            _ => false,
        };
        (peer, delivered)
    }

    /// Emit a listener-level error.
    pub fn fail(&self, message: &str) -> bool {
        let state = self.state.lock().unwrap();
        match &state.sender {
            Some(tx) => tx
                .send(ListenerEvent::Error(ListenerError::Accept(io::Error::new(
                    io::ErrorKind::Other,
                    message.to_string(),
                ))))
                .is_ok(),
            None => false,
        }
    }

    /// Bring a closed transport back, as if the socket were reopened.
    pub fn reactivate(&self) {
        self.state.lock().unwrap().active = true;
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = false;
        state.sender = None;
    }

    pub fn applied(&self) -> Vec<(String, OptionValue)> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

/// Secured side of a mock handshake.
pub struct MockSecure {
    pub inner: MockConn,
}

impl MockSecure {
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }
}

enum Verdict {
    Secure,
    Fail(String),
    Panic,
}

/// A handshake the test resolves by hand.
pub struct Pending {
    pub connection_id: ConnectionId,
    pub options: Arc<TlsOptions>,
    verdict: oneshot::Sender<Verdict>,
}

impl Pending {
    pub fn succeed(self) {
        let _ = self.verdict.send(Verdict::Secure);
    }

    pub fn fail(self, message: &str) {
        let _ = self.verdict.send(Verdict::Fail(message.to_string()));
    }

    pub fn panic(self) {
        let _ = self.verdict.send(Verdict::Panic);
    }
}

/// Handshake primitive that parks every attempt until the test decides.
pub struct ScriptedHandshake {
    pending: mpsc::UnboundedSender<Pending>,
}

impl ScriptedHandshake {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Pending>) {
        let (pending, rx) = mpsc::unbounded_channel();
        (Self { pending }, rx)
    }
}

impl Handshake<MockConn> for ScriptedHandshake {
    type Secure = MockSecure;

    fn upgrade(&self, conn: MockConn, options: Arc<TlsOptions>) -> BoxFuture<'static, HandshakeResult<MockSecure, MockConn>> {
        let pending = self.pending.clone();
        Box::pin(async move {
            let (verdict, decided) = oneshot::channel();
            let _ = pending.send(Pending {
                connection_id: conn.id,
                options,
                verdict,
            });
            match decided.await {
                Ok(Verdict::Secure) => Ok(MockSecure { inner: conn }),
                Ok(Verdict::Fail(message)) => Err(HandshakeFailure::new(HandshakeError::Other(message), conn)),
                Ok(Verdict::Panic) => panic!("handshake primitive blew up"),
                Err(_) => Err(HandshakeFailure::new(HandshakeError::Aborted, conn)),
            }
        })
    }
}

/// Wait for the next parked handshake.
pub async fn next_pending(rx: &mut mpsc::UnboundedReceiver<Pending>) -> Pending {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no handshake started in time")
        .expect("handshake channel closed")
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
