//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!
//! [tls] table
//!     → options.rs (TlsOptions, ordered)
//!     → passphrase defaulted, applied once to the listener transport
//!     → shared as Arc<TlsOptions> with every handshake
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - TLS options are an open mapping; only recognized names are type-checked

pub mod loader;
pub mod options;
pub mod schema;
pub mod validation;

pub use options::{OptionValue, TlsOptions};
pub use schema::{AppConfig, HandshakeConfig, ListenerConfig, ObservabilityConfig};
