//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the TLS context eagerly from the configured options
//! - Bind the plaintext listener
//! - Wrap the handshake with the configured deadline
//! - Start the secure server
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, once TLS configuration is known to load

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_rustls::server::TlsStream;

use crate::config::AppConfig;
use crate::error::{ConfigurationError, HandshakeError, ListenerError};
use crate::net::{RustlsHandshake, TcpConnection, TcpPlainListener};
use crate::resilience::TimeoutHandshake;
use crate::server::SecureServer;

/// The server type the binary runs.
pub type TlsServer = SecureServer<TcpPlainListener, TlsStream<TcpConnection>>;

/// Error type for startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] HandshakeError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Bind and start a TLS server from a validated configuration.
pub async fn start_server(config: &AppConfig) -> Result<TlsServer, StartupError> {
    let handshake = Arc::new(RustlsHandshake::new());
    let options = Arc::new(config.tls.clone().with_default_passphrase());
    handshake.preload(&options)?;

    let listener = TcpPlainListener::bind(&config.listener).await?;

    let server = match config.handshake.timeout_secs {
        0 => SecureServer::start(listener, handshake, config.tls.clone())?,
        secs => {
            let handshake = TimeoutHandshake::new(handshake, Duration::from_secs(secs));
            SecureServer::start(listener, handshake, config.tls.clone())?
        }
    };
    Ok(server)
}
