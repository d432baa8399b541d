//! TLS echo server.
//!
//! ```text
//!  client ──TCP──▶ TcpPlainListener ──plain──▶ SecureServer ──TLS──▶ echo task
//!                                                  │
//!                                                  └── handshake / listener errors → log
//! ```
//!
//! Loads a TOML configuration, binds the listener, and echoes every byte a
//! secured client sends until it disconnects or the process is signalled.

use clap::Parser;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use secure_accept::config::loader::load_config;
use secure_accept::lifecycle::signals::spawn_signal_handler;
use secure_accept::lifecycle::startup::start_server;
use secure_accept::lifecycle::Shutdown;
use secure_accept::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "secure-accept")]
#[command(about = "TLS echo server built on the secure accept layer", long_about = None)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long, default_value = "secure-accept.toml")]
    config: PathBuf,

    /// Override the configured bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability.log_level)?;
    tracing::info!("secure-accept v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        let addr: std::net::SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let server = start_server(&config).await?;
    tracing::info!(address = ?server.local_addr(), "Listening for TLS connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);
    let mut stop = shutdown.subscribe();

    let mut incoming = server.incoming().ok_or("incoming stream already taken")?;
    let mut errors = server.errors();

    loop {
        tokio::select! {
            conn = incoming.accept() => match conn {
                Some(conn) => {
                    tokio::spawn(echo(conn, shutdown.subscribe()));
                }
                None => break,
            },
            Some(err) = errors.recv() => {
                tracing::warn!(error = %err, "Server error");
            }
            _ = stop.recv() => break,
        }
    }

    server.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn echo<S>(conn: S, mut stop: broadcast::Receiver<()>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(conn);
    tokio::select! {
        copied = tokio::io::copy(&mut reader, &mut writer) => match copied {
            Ok(bytes) => tracing::debug!(bytes, "Client disconnected"),
            Err(e) => tracing::debug!(error = %e, "Echo stopped"),
        },
        _ = stop.recv() => {}
    }
    let _ = writer.shutdown().await;
}
