//! rustls-backed handshake primitive.
//!
//! # Responsibilities
//! - Load certificate chain and private key (PEM) named by the TLS options
//! - Build a `rustls::ServerConfig` (client auth, ALPN, minimum version)
//! - Cache the built context for the option set it was built from
//! - Run the server handshake, handing the plaintext stream back on failure

use arc_swap::ArcSwapOption;
use futures_util::future::BoxFuture;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedProtocolVersion};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsOptions;
use crate::error::HandshakeError;
use crate::net::connection::Connection;
use crate::net::handshake::{Handshake, HandshakeFailure, HandshakeResult};

/// Load certificates from a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, HandshakeError> {
    let file = File::open(path).map_err(|e| {
        HandshakeError::Config(format!(
            "failed to open certificate file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| HandshakeError::Config(format!("failed to parse certificates: {e}")))?;

    if certs.is_empty() {
        return Err(HandshakeError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    tracing::debug!(path = %path.display(), count = certs.len(), "Loaded TLS certificates");
    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, HandshakeError> {
    let file = File::open(path).map_err(|e| {
        HandshakeError::Config(format!(
            "failed to open private key file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| HandshakeError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| {
            HandshakeError::Config(format!("no private key found in {}", path.display()))
        })
}

fn protocol_versions(options: &TlsOptions) -> &'static [&'static SupportedProtocolVersion] {
    static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
    match options.min_protocol_version() {
        Some("1.3") => TLS13_ONLY,
        _ => rustls::ALL_VERSIONS,
    }
}

/// Build a server TLS context from an option set.
///
/// `local_certificate` may contain the key as well; `private_key` overrides it.
pub fn build_server_config(options: &TlsOptions) -> Result<ServerConfig, HandshakeError> {
    let cert_path = options
        .local_certificate()
        .ok_or_else(|| HandshakeError::Config("local_certificate is not set".to_string()))?;

    // rustls-pemfile cannot decrypt keys.
    if options.passphrase().is_some_and(|p| !p.is_empty()) {
        return Err(HandshakeError::Config(
            "encrypted private keys are not supported".to_string(),
        ));
    }

    let certs = load_certificates(Path::new(cert_path))?;
    let key = load_private_key(Path::new(options.private_key().unwrap_or(cert_path)))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(protocol_versions(options))
        .map_err(|e| HandshakeError::Config(e.to_string()))?;

    let builder = if options.peer_verification() {
        let ca_path = options.ca_file().ok_or_else(|| {
            HandshakeError::Config("peer_verification requires ca_file".to_string())
        })?;
        let verifier = client_verifier(Path::new(ca_path), provider)?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| HandshakeError::Config(format!("failed to build TLS config: {e}")))?;

    config.alpn_protocols = options
        .allowed_protocols()
        .into_iter()
        .map(String::into_bytes)
        .collect();

    tracing::info!(
        cert_file = %cert_path,
        alpn = ?options.allowed_protocols(),
        client_auth = options.peer_verification(),
        "TLS context built"
    );

    Ok(config)
}

fn client_verifier(
    ca_path: &Path,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>, HandshakeError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(ca_path)? {
        roots
            .add(cert)
            .map_err(|e| HandshakeError::Config(format!("failed to add CA certificate: {e}")))?;
    }
    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
        .build()
        .map_err(|e| HandshakeError::Config(e.to_string()))
}

/// Context built for one specific option set.
struct CompiledContext {
    options: Arc<TlsOptions>,
    acceptor: TlsAcceptor,
}

type ContextCache = ArcSwapOption<CompiledContext>;

fn cached_acceptor(cache: &ContextCache, options: &Arc<TlsOptions>) -> Option<TlsAcceptor> {
    let cached = cache.load();
    match &*cached {
        Some(ctx) if Arc::ptr_eq(&ctx.options, options) || *ctx.options == **options => {
            Some(ctx.acceptor.clone())
        }
        _ => None,
    }
}

/// Blocking: reads the PEM files named by `options`.
fn compile(cache: &ContextCache, options: &Arc<TlsOptions>) -> Result<TlsAcceptor, HandshakeError> {
    if let Some(acceptor) = cached_acceptor(cache, options) {
        return Ok(acceptor);
    }

    let acceptor = TlsAcceptor::from(Arc::new(build_server_config(options)?));
    cache.store(Some(Arc::new(CompiledContext {
        options: Arc::clone(options),
        acceptor: acceptor.clone(),
    })));
    Ok(acceptor)
}

/// [`compile`] on the blocking pool, for use from handshake tasks.
async fn compile_off_runtime(
    cache: Arc<ContextCache>,
    options: Arc<TlsOptions>,
) -> Result<TlsAcceptor, HandshakeError> {
    tokio::task::spawn_blocking(move || compile(&cache, &options))
        .await
        .map_err(|e| HandshakeError::Other(format!("TLS context build failed: {e}")))?
}

/// Handshake primitive backed by rustls.
///
/// The TLS context is built on first use and reused for as long as the
/// same option set is passed in. Builds triggered by a connection run on
/// the blocking pool; [`RustlsHandshake::preload`] builds inline.
#[derive(Default)]
pub struct RustlsHandshake {
    context: Arc<ContextCache>,
}

impl RustlsHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context eagerly so configuration problems surface at startup.
    pub fn preload(&self, options: &Arc<TlsOptions>) -> Result<(), HandshakeError> {
        compile(&self.context, options).map(|_| ())
    }
}

impl<C: Connection> Handshake<C> for RustlsHandshake {
    type Secure = TlsStream<C>;

    fn upgrade(
        &self,
        conn: C,
        options: Arc<TlsOptions>,
    ) -> BoxFuture<'static, HandshakeResult<TlsStream<C>, C>> {
        let cached = cached_acceptor(&self.context, &options);
        let cache = Arc::clone(&self.context);
        Box::pin(async move {
            let acceptor = match cached {
                Some(acceptor) => acceptor,
                None => match compile_off_runtime(cache, options).await {
                    Ok(acceptor) => acceptor,
                    Err(error) => return Err(HandshakeFailure::new(error, conn)),
                },
            };
            acceptor
                .accept(conn)
                .into_fallible()
                .await
                .map_err(|(e, conn)| HandshakeFailure::new(HandshakeError::Tls(e), conn))
        })
    }
}
