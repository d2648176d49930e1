//! Prometheus metrics and structured logging for the order desk.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus counters for ledger operations, reconciliation probes,
//!   single-flight rejections, side-effect failures and order store refreshes

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
