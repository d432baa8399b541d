//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Type-check recognized TLS options; unknown options pass through
//! - Validate value ranges (limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - `validate_option` is also what the TCP transport uses to reject options

use std::net::SocketAddr;
use thiserror::Error;
use toml::Value;

use crate::config::options::{self, OptionValue};
use crate::config::schema::AppConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address `{0}`")]
    BindAddress(String),

    #[error("max_connections must be greater than zero")]
    MaxConnections,

    #[error("invalid metrics address `{0}`")]
    MetricsAddress(String),

    #[error("tls option `{name}` {reason}")]
    Option { name: String, reason: String },
}

/// Check a single TLS option. Unrecognized names are always accepted.
pub fn validate_option(name: &str, value: &OptionValue) -> Result<(), ValidationError> {
    let reject = |reason: &str| {
        Err(ValidationError::Option {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    match name {
        options::LOCAL_CERTIFICATE | options::PRIVATE_KEY | options::CA_FILE => match value {
            Value::String(s) if !s.is_empty() => Ok(()),
            Value::String(_) => reject("must not be empty"),
            _ => reject("must be a path string"),
        },
        options::PASSPHRASE => match value {
            Value::String(_) => Ok(()),
            _ => reject("must be a string"),
        },
        options::PEER_VERIFICATION => match value {
            Value::Boolean(_) => Ok(()),
            _ => reject("must be a boolean"),
        },
        options::ALLOWED_PROTOCOLS => match value {
            Value::Array(items) if items.iter().all(|v| v.as_str().is_some_and(|s| !s.is_empty())) => Ok(()),
            _ => reject("must be a list of non-empty strings"),
        },
        options::MIN_PROTOCOL_VERSION => match value.as_str() {
            Some("1.2") | Some("1.3") => Ok(()),
            _ => reject("must be \"1.2\" or \"1.3\""),
        },
        _ => Ok(()),
    }
}

/// Validate a whole configuration, collecting every error.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }
    for (name, value) in config.tls.iter() {
        if let Err(e) = validate_option(name, value) {
            errors.push(e);
        }
    }
    if !config.tls.contains(options::LOCAL_CERTIFICATE) {
        errors.push(ValidationError::Option {
            name: options::LOCAL_CERTIFICATE.to_string(),
            reason: "is required".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
