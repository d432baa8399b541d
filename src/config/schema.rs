//! Configuration schema definitions.
//!
//! This module defines the configuration structure for the secure accept
//! server. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::config::options::TlsOptions;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Plaintext listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// TLS options applied to the listener, in file order.
    pub tls: TlsOptions,

    /// Handshake policy.
    pub handshake: HandshakeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Handshake policy wrapped around the TLS primitive.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Handshake deadline in seconds. `0` disables the deadline.
    pub timeout_secs: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
