//! Restricted-asset purchase order desk.
//!
//! Operator application around the order desk service:
//! - TOML configuration with validation
//! - Wiring of ledger gateway, compliance registry and yield venue
//! - `rwa-desk` CLI (create / approve / reject / cancel / list / address / metrics)

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
