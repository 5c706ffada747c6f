//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher / handshake / fault funnel
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, optional Prometheus endpoint)
//! ```

pub mod logging;
pub mod metrics;
