//! TLS upgrade layer for plaintext listeners.
//!
//! A [`SecureServer`] takes ownership of a [`PlainListener`], applies a
//! [`TlsOptions`] set to it once, and upgrades every accepted connection
//! through a [`Handshake`] primitive. Each accepted connection ends in
//! exactly one secured connection on [`Incoming`] or one error on the error
//! subscribers (after which the plaintext connection is closed).

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod server;

pub use config::{AppConfig, TlsOptions};
pub use error::{ConfigurationError, HandshakeError, ListenerError, ServerError};
pub use net::{Connection, Handshake, HandshakeFailure, PlainListener, RustlsHandshake, TcpPlainListener};
pub use server::{ErrorEvents, Incoming, SecureServer};
