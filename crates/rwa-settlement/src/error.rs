//! Desk error types.
//!
//! Every variant renders a human-readable message. Only `SubmissionFailed`
//! carries raw ledger diagnostics.

use rwa_compliance::RegistryError;
use rwa_core::{Address, AssetId, CoreError, OrderStatus};
use rwa_ledger::{LedgerError, RpcError};
use thiserror::Error;

use crate::single_flight::OperationKind;

#[derive(Debug, Error)]
pub enum DeskError {
    /// Composed order timestamp exceeds the ledger field; nothing was sent.
    #[error("Order timestamp out of range: {0}")]
    AddressRange(String),

    #[error("A {kind} operation is already in progress for {key}")]
    AlreadyInProgress { kind: OperationKind, key: String },

    #[error("Ledger rejected the operation: {message}")]
    SubmissionFailed { message: String, logs: Vec<String> },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("Order {address} is no longer pending (status: {status})")]
    StaleOrderState { address: Address, status: OrderStatus },

    #[error("{owner} has no holding account for asset {asset}")]
    SourceAccountMissing { owner: Address, asset: AssetId },

    #[error("Order not found: {0}")]
    OrderNotFound(Address),

    #[error("Invalid order: {0}")]
    Validation(#[from] CoreError),

    #[error("Compliance lookup failed: {0}")]
    Compliance(#[from] RegistryError),

    #[error("Ledger query failed: {0}")]
    Query(#[from] RpcError),

    /// Program address derivation failed for an order-related account.
    #[error("Address derivation failed: {0}")]
    Derivation(String),

    #[error("Failed to encode operation: {0}")]
    Encoding(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

impl DeskError {
    /// Diagnostic log lines, when the ledger supplied any.
    #[must_use]
    pub fn logs(&self) -> Option<&[String]> {
        match self {
            Self::SubmissionFailed { logs, .. } if !logs.is_empty() => Some(logs),
            _ => None,
        }
    }

    /// Whether the operation was refused before anything reached the ledger.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::SubmissionFailed { .. } | Self::Query(_))
    }
}

impl From<LedgerError> for DeskError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AddressRange(msg) => Self::AddressRange(msg),
            LedgerError::SubmissionFailed { message, logs } => {
                Self::SubmissionFailed { message, logs }
            }
            LedgerError::Rpc(e) => Self::Query(e),
            e @ (LedgerError::InvalidSeeds(_) | LedgerError::NoViableBump) => {
                Self::Derivation(e.to_string())
            }
            LedgerError::Encode(msg) => Self::Encoding(msg),
            e @ (LedgerError::SignerMismatch { .. } | LedgerError::Key(_)) => {
                Self::Signing(e.to_string())
            }
        }
    }
}

pub type DeskResult<T> = Result<T, DeskError>;
