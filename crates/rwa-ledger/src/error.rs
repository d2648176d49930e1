//! Ledger error types.

use thiserror::Error;

use crate::signer::KeyError;

/// Errors reported by a ledger endpoint.
///
/// `Rejected` carries the ledger's own message text. That text is the only
/// signal the ledger offers for duplicate submissions; see
/// `submit::SubmitErrorClass::classify`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Ledger rejected operation: {message}")]
    Rejected { message: String, logs: Vec<String> },

    /// The operation was sent but its confirmation could not be observed.
    #[error("Confirmation unknown: {0}")]
    ConfirmationUnknown(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed ledger response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Convenience constructor for a rejection without logs.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            logs: Vec::new(),
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Composed order timestamp does not fit the ledger's i64 field.
    #[error("Order timestamp out of range: {0}")]
    AddressRange(String),

    #[error("Invalid address seeds: {0}")]
    InvalidSeeds(String),

    #[error("No viable bump seed for program address")]
    NoViableBump,

    #[error("Failed to encode operation: {0}")]
    Encode(String),

    #[error("Signer {signer} is not the operation payer {payer}")]
    SignerMismatch {
        signer: rwa_core::Address,
        payer: rwa_core::Address,
    },

    /// Genuine ledger rejection, after reconciliation where applicable.
    #[error("Submission failed: {message}")]
    SubmissionFailed { message: String, logs: Vec<String> },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
