//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Plaintext connection:
//!     → timeouts.rs (deadline around the handshake primitive)
//!     → inner primitive (rustls)
//! ```
//!
//! # Design Decisions
//! - The secure server itself imposes no deadline; policy wraps the primitive
//! - No retries: a failed handshake is reported and the connection discarded

pub mod timeouts;

pub use timeouts::TimeoutHandshake;
