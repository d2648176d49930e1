//! Ledger boundary.
//!
//! Trait-based abstraction over the ledger endpoint so the submission
//! client, settlement builder and order store can be driven by the HTTP
//! gateway in production and by `MockLedger` in tests.

use std::pin::Pin;
use std::sync::Arc;

use rwa_core::{Address, Order};

use crate::error::RpcResult;
use crate::operation::{OperationRef, SignedOperation};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Ledger endpoint operations used by the desk.
pub trait LedgerRpc: Send + Sync {
    /// Send a signed operation and wait for its confirmation.
    fn send_operation<'a>(&'a self, op: &'a SignedOperation) -> BoxFuture<'a, RpcResult<OperationRef>>;

    /// Whether an account exists at `address`.
    fn account_exists<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, RpcResult<bool>>;

    /// Asset balance of a holding account; `None` if the account does not exist.
    fn token_balance<'a>(&'a self, account: &'a Address) -> BoxFuture<'a, RpcResult<Option<u64>>>;

    /// Most recent operation references touching `address`, newest first.
    fn recent_operation_refs<'a>(
        &'a self,
        address: &'a Address,
        limit: usize,
    ) -> BoxFuture<'a, RpcResult<Vec<OperationRef>>>;

    /// Diagnostic log lines from simulating `op` against current state.
    fn simulate_logs<'a>(&'a self, op: &'a SignedOperation) -> BoxFuture<'a, RpcResult<Vec<String>>>;

    /// Every order record owned by `program`.
    fn list_orders<'a>(&'a self, program: &'a Address) -> BoxFuture<'a, RpcResult<Vec<Order>>>;

    /// A single order record, if present.
    fn fetch_order<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, RpcResult<Option<Order>>>;
}

/// Shared ledger handle.
pub type DynLedgerRpc = Arc<dyn LedgerRpc>;
