//! Order lifecycle and settlement.
//!
//! - `store`: immutable order snapshots, replaced wholesale on refresh
//! - `single_flight`: fail-fast guard against duplicate concurrent operations
//! - `builder`: compliance-gated approval operation assembly
//! - `side_effect`: best-effort yield deposit after settlement
//! - `desk`: the create/approve/reject/cancel service tying it together

pub mod builder;
pub mod desk;
pub mod error;
pub mod side_effect;
pub mod single_flight;
pub mod store;

pub use builder::{SettlementBuilder, SettlementPlan};
pub use desk::{ApprovalReceipt, CreateReceipt, DeskSettings, OperationReceipt, OrderDesk};
pub use error::{DeskError, DeskResult};
pub use side_effect::{
    DynYieldVenue, LedgerYieldVenue, MockYieldVenue, SideEffectDispatcher, SideEffectFailed,
    SideEffectOutcome, YieldVenue,
};
pub use single_flight::{FlightGuard, FlightKey, OperationKind, SingleFlight};
pub use store::{OrderSnapshot, OrderStore};
