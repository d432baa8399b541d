//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits, option recording)
//!     → connection.rs (TcpConnection, connection id, permit)
//!     → handshake.rs (primitive boundary)
//!     → tls.rs (rustls negotiation)
//!     → Hand off to the secure server
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Listener and handshake are traits so the server can be driven by any transport
//! - A failed handshake returns the plaintext stream to its caller

pub mod connection;
pub mod handshake;
pub mod listener;
pub mod tls;

pub use connection::{Connection, ConnectionId, TcpConnection};
pub use handshake::{Handshake, HandshakeFailure, HandshakeResult};
pub use listener::{
    ListenerEvent, ListenerEvents, OptionRejected, PlainListener, TcpPlainListener, Transport,
};
pub use tls::RustlsHandshake;
