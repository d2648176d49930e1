//! Registry error types.

use rwa_core::Address;
use rwa_ledger::RpcError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Failed to derive validation account: {0}")]
    Derivation(String),

    #[error("Identity not registered with the compliance program: {0}")]
    NotRegistered(Address),

    #[error("Registry lookup failed: {0}")]
    Lookup(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
