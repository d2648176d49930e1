//! Error types for rwa-core.

use thiserror::Error;

use crate::order::OrderStatus;

/// Core error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid quantity (must be > 0)")]
    InvalidQuantity,

    #[error("Invalid unit price (must be > 0)")]
    InvalidPrice,

    #[error("Overflow computing total due: {quantity} x {unit_price}")]
    MathOverflow { quantity: u64, unit_price: u64 },

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("Reject reason too long: {len} chars (max {max})")]
    RejectReasonTooLong { len: usize, max: usize },

    #[error("Only the requester may cancel this order")]
    UnauthorizedCancel,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
