//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener, server driver, handshake tasks produce:
//!     → logging.rs (structured log events, connection_id / peer_addr fields)
//!     → metrics.rs (handshake counters, in-flight gauge, durations)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
