//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Input(#[from] rwa_core::CoreError),

    #[error("Ledger client error: {0}")]
    Ledger(#[from] rwa_ledger::RpcError),

    #[error("Signer error: {0}")]
    Key(#[from] rwa_ledger::KeyError),

    #[error(transparent)]
    Desk(#[from] rwa_settlement::DeskError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] rwa_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
