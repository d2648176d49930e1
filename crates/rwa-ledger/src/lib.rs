//! Ledger boundary for the order desk.
//!
//! - `deriver`: collision-resistant order addresses from a composed timestamp
//! - `pda`: program-derived addresses for orders, holding and compliance accounts
//! - `operation`: atomic multi-step operations, signing message and references
//! - `signer`: explicit signing capability and key loading
//! - `rpc`: the `LedgerRpc` trait the rest of the desk is written against
//! - `submit`: submission client that reconciles ambiguous "already processed" errors
//! - `gateway`: JSON-RPC over HTTP implementation of `LedgerRpc`
//! - `mock`: in-memory ledger with fault injection for tests

pub mod deriver;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod operation;
pub mod pda;
pub mod rpc;
pub mod signer;
pub mod submit;

pub use deriver::{AddressDeriver, OrderTimestampGenerator, SystemTimeSource, TimeSource};
pub use error::{LedgerError, LedgerResult, RpcError, RpcResult};
pub use gateway::JsonRpcLedger;
pub use mock::{test_program_ids, MockLedger};
pub use operation::{Operation, OperationRef, SignedOperation, Step, TransferStep};
pub use pda::ProgramIds;
pub use rpc::{BoxFuture, DynLedgerRpc, LedgerRpc};
pub use signer::{KeyError, KeyManager, KeySource, KeypairSigner, OperationSigner};
pub use submit::{
    ReconcilePolicy, ReconcileProbe, SubmissionClient, SubmitErrorClass, SubmitOutcome,
    MAX_RECONCILE_DELAY_MS, MAX_RECONCILE_PROBES,
};
