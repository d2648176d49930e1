//! Core domain types for restricted-asset purchase orders.
//!
//! This crate provides the types shared by every layer of the desk:
//! - `Address`, `AssetId`: 32-byte ledger identities
//! - `Order`, `OrderStatus`: the purchase order record and its state machine
//! - `OrderTimestamp`: the high-resolution creation stamp that seeds order addresses
//! - `SettlementRef`: opaque reference to the ledger operation that settled an order
//! - `units`: conversion between smallest-unit integers and display decimals

pub mod address;
pub mod error;
pub mod order;
pub mod units;

pub use address::{Address, AssetId};
pub use error::{CoreError, Result};
pub use order::{
    compute_total_due, validate_reject_reason, Order, OrderStatus, OrderTimestamp,
    SettlementRef, MAX_REJECT_REASON_LEN,
};
pub use units::{format_units, parse_units};
