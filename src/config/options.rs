//! TLS option set applied to a listener.
//!
//! Options form an ordered name → value mapping. Order is the insertion (or
//! file) order and is the order options are applied to the transport.
//! Names the crate does not recognize are carried through untouched.

use serde::{Deserialize, Serialize};
use toml::{Table, Value};

/// Value of a single TLS option.
pub type OptionValue = Value;

/// Path to a PEM file holding the certificate chain (and optionally the key).
pub const LOCAL_CERTIFICATE: &str = "local_certificate";
/// Path to a PEM file holding the private key, when not bundled with the chain.
pub const PRIVATE_KEY: &str = "private_key";
/// Passphrase for an encrypted private key.
pub const PASSPHRASE: &str = "passphrase";
/// Require and verify client certificates.
pub const PEER_VERIFICATION: &str = "peer_verification";
/// Trust anchors for client certificate verification.
pub const CA_FILE: &str = "ca_file";
/// ALPN protocol identifiers, in preference order.
pub const ALLOWED_PROTOCOLS: &str = "allowed_protocols";
/// Lowest protocol version to negotiate ("1.2" or "1.3").
pub const MIN_PROTOCOL_VERSION: &str = "min_protocol_version";

/// Ordered TLS option mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TlsOptions(Table);

impl TlsOptions {
    /// Create an empty option set.
    pub fn new() -> Self {
        Self(Table::new())
    }

    /// Builder-style insert. Replaces an existing value in place.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace an option.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<OptionValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Insert an option only if it is not already present.
    pub fn insert_default(&mut self, name: impl Into<String>, value: impl Into<OptionValue>) {
        self.0.entry(name.into()).or_insert_with(|| value.into());
    }

    /// Return the effective option set: the passphrase defaults to `""`.
    ///
    /// Explicit passphrases are preserved unchanged.
    pub fn with_default_passphrase(mut self) -> Self {
        self.insert_default(PASSPHRASE, "");
        self
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterate options in application order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn str_value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn local_certificate(&self) -> Option<&str> {
        self.str_value(LOCAL_CERTIFICATE)
    }

    pub fn private_key(&self) -> Option<&str> {
        self.str_value(PRIVATE_KEY)
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.str_value(PASSPHRASE)
    }

    pub fn ca_file(&self) -> Option<&str> {
        self.str_value(CA_FILE)
    }

    pub fn min_protocol_version(&self) -> Option<&str> {
        self.str_value(MIN_PROTOCOL_VERSION)
    }

    /// Whether client certificates are required. Defaults to `false`.
    pub fn peer_verification(&self) -> bool {
        self.get(PEER_VERIFICATION)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// ALPN identifiers in preference order. Non-string entries are skipped.
    pub fn allowed_protocols(&self) -> Vec<String> {
        match self.get(ALLOWED_PROTOCOLS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl FromIterator<(String, OptionValue)> for TlsOptions {
    fn from_iter<I: IntoIterator<Item = (String, OptionValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
