//! Purchase order record and status state machine.
//!
//! An order is created `Pending` by the requester and leaves `Pending`
//! exactly once, by approval, rejection or requester cancellation.
//! Terminal states never change again.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::{Address, AssetId};
use crate::error::{CoreError, Result};

/// Maximum length of a rejection reason (characters).
pub const MAX_REJECT_REASON_LEN: usize = 200;

// ============================================================================
// OrderStatus
// ============================================================================

/// Lifecycle status of a purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Awaiting an approver decision.
    #[default]
    Pending,
    /// Settled: asset transferred to the requester.
    Approved,
    /// Refused by an approver; deposit refunded.
    Rejected,
    /// Withdrawn by the requester; deposit refunded.
    Cancelled,
}

impl OrderStatus {
    /// All statuses in display order.
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Rejected,
        OrderStatus::Cancelled,
    ];

    /// Every status other than `Pending` is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether `self -> to` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        matches!(self, Self::Pending) && to.is_terminal()
    }

    /// Validate a transition, returning `IllegalTransition` otherwise.
    pub fn ensure_transition(&self, to: OrderStatus) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition { from: *self, to })
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

// ============================================================================
// OrderTimestamp
// ============================================================================

/// High-resolution creation timestamp used as an address seed.
///
/// Stored in the ledger's signed 64-bit timestamp field. The value is
/// composed by the address deriver and is only meaningful as a unique seed;
/// it is not a wall-clock reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderTimestamp(i64);

impl OrderTimestamp {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Little-endian bytes, as used in address seeds.
    #[must_use]
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for OrderTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SettlementRef
// ============================================================================

/// Opaque reference to the ledger operation that performed settlement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementRef(String);

impl SettlementRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SettlementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Order
// ============================================================================

/// A purchase order record as stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Address the record lives at (derived from asset, requester, created_at).
    pub address: Address,
    /// Party who created the order.
    pub requester: Address,
    /// Restricted asset being purchased.
    pub asset: AssetId,
    /// Units requested, in the asset's smallest unit.
    pub quantity: u64,
    /// Price per unit in the settlement currency's smallest unit.
    pub unit_price: u64,
    /// `quantity * unit_price`, fixed at creation.
    pub total_due: u64,
    pub status: OrderStatus,
    /// Address seed timestamp.
    pub created_at: OrderTimestamp,
    /// Unix seconds of the last status change.
    pub updated_at: i64,
    /// Approver or rejecter; set on leaving `Pending` via approve/reject.
    #[serde(default)]
    pub processed_by: Option<Address>,
    /// Set only when `Approved`.
    #[serde(default)]
    pub settlement_ref: Option<SettlementRef>,
    /// Set only when `Rejected`.
    #[serde(default)]
    pub reject_reason: Option<String>,
}

/// Compute `quantity * unit_price` with validation.
pub fn compute_total_due(quantity: u64, unit_price: u64) -> Result<u64> {
    if quantity == 0 {
        return Err(CoreError::InvalidQuantity);
    }
    if unit_price == 0 {
        return Err(CoreError::InvalidPrice);
    }
    let total = (quantity as u128) * (unit_price as u128);
    u64::try_from(total).map_err(|_| CoreError::MathOverflow {
        quantity,
        unit_price,
    })
}

impl Order {
    /// Create a new pending order, validating quantity, price and total.
    pub fn new_pending(
        address: Address,
        requester: Address,
        asset: AssetId,
        quantity: u64,
        unit_price: u64,
        created_at: OrderTimestamp,
        now_secs: i64,
    ) -> Result<Self> {
        let total_due = compute_total_due(quantity, unit_price)?;
        Ok(Self {
            address,
            requester,
            asset,
            quantity,
            unit_price,
            total_due,
            status: OrderStatus::Pending,
            created_at,
            updated_at: now_secs,
            processed_by: None,
            settlement_ref: None,
            reject_reason: None,
        })
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    /// Transition to `Approved`.
    pub fn approve(
        &mut self,
        approver: Address,
        settlement_ref: SettlementRef,
        now_secs: i64,
    ) -> Result<()> {
        self.status.ensure_transition(OrderStatus::Approved)?;
        self.status = OrderStatus::Approved;
        self.processed_by = Some(approver);
        self.settlement_ref = Some(settlement_ref);
        self.updated_at = now_secs;
        Ok(())
    }

    /// Transition to `Rejected` with a reason.
    pub fn reject(&mut self, approver: Address, reason: &str, now_secs: i64) -> Result<()> {
        validate_reject_reason(reason)?;
        self.status.ensure_transition(OrderStatus::Rejected)?;
        self.status = OrderStatus::Rejected;
        self.processed_by = Some(approver);
        self.reject_reason = Some(reason.to_string());
        self.updated_at = now_secs;
        Ok(())
    }

    /// Transition to `Cancelled`; only the requester may cancel.
    pub fn cancel(&mut self, by: Address, now_secs: i64) -> Result<()> {
        if by != self.requester {
            return Err(CoreError::UnauthorizedCancel);
        }
        self.status.ensure_transition(OrderStatus::Cancelled)?;
        self.status = OrderStatus::Cancelled;
        self.updated_at = now_secs;
        Ok(())
    }
}

/// Validate a rejection reason length.
pub fn validate_reject_reason(reason: &str) -> Result<()> {
    let len = reason.chars().count();
    if len > MAX_REJECT_REASON_LEN {
        return Err(CoreError::RejectReasonTooLong {
            len,
            max: MAX_REJECT_REASON_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(b: u8) -> Address {
        Address::new([b; 32])
    }

    fn pending() -> Order {
        Order::new_pending(
            addr(1),
            addr(2),
            AssetId::new(addr(3)),
            100,
            10,
            OrderTimestamp::new(1_700_000_000_000_000_000),
            1_700_000_000,
        )
        .unwrap()
    }

    #[test]
    fn test_total_due_computed_at_creation() {
        let order = pending();
        assert_eq!(order.total_due, 1000);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.processed_by.is_none());
        assert!(order.settlement_ref.is_none());
    }

    #[test]
    fn test_creation_validation() {
        assert_eq!(compute_total_due(0, 10), Err(CoreError::InvalidQuantity));
        assert_eq!(compute_total_due(10, 0), Err(CoreError::InvalidPrice));
        assert!(matches!(
            compute_total_due(u64::MAX, 2),
            Err(CoreError::MathOverflow { .. })
        ));
    }

    #[test]
    fn test_approve_sets_ref_and_processor() {
        let mut order = pending();
        order.approve(addr(9), SettlementRef::new("sig"), 5).unwrap();
        assert_eq!(order.status, OrderStatus::Approved);
        assert_eq!(order.processed_by, Some(addr(9)));
        assert_eq!(order.settlement_ref, Some(SettlementRef::new("sig")));
        assert_eq!(order.total_due, 1000);
    }

    #[test]
    fn test_reject_reason_limit() {
        let mut order = pending();
        let long = "x".repeat(MAX_REJECT_REASON_LEN + 1);
        assert!(matches!(
            order.reject(addr(9), &long, 5),
            Err(CoreError::RejectReasonTooLong { .. })
        ));
        assert!(order.is_pending());
        order.reject(addr(9), "kyc incomplete", 5).unwrap();
        assert_eq!(order.reject_reason.as_deref(), Some("kyc incomplete"));
        assert!(order.settlement_ref.is_none());
    }

    #[test]
    fn test_only_requester_cancels() {
        let mut order = pending();
        assert_eq!(order.cancel(addr(9), 5), Err(CoreError::UnauthorizedCancel));
        order.cancel(addr(2), 5).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.processed_by.is_none());
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in OrderStatus::ALL {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("open".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_json_is_camel_case() {
        let json = serde_json::to_value(pending()).unwrap();
        assert!(json.get("unitPrice").is_some());
        assert!(json.get("totalDue").is_some());
        assert_eq!(json["status"], "pending");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Approve(u8),
        Reject(u8),
        Cancel(u8),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Approve),
            any::<u8>().prop_map(Op::Reject),
            any::<u8>().prop_map(|_| Op::Cancel(2)),
        ]
    }

    fn apply(order: &mut Order, op: &Op) -> Result<()> {
        match op {
            Op::Approve(b) => order.approve(addr(*b), SettlementRef::new(format!("s{b}")), 9),
            Op::Reject(b) => order.reject(addr(*b), "no", 9),
            Op::Cancel(b) => order.cancel(addr(*b), 9),
        }
    }

    proptest! {
        /// Once an order leaves Pending, nothing changes its resolution fields.
        #[test]
        fn terminal_orders_are_immutable(ops in prop::collection::vec(arb_op(), 1..12)) {
            let mut order = pending();
            let mut frozen: Option<Order> = None;
            for op in &ops {
                let result = apply(&mut order, op);
                if let Some(snapshot) = &frozen {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(&order, snapshot);
                } else if order.status.is_terminal() {
                    prop_assert!(result.is_ok());
                    frozen = Some(order.clone());
                }
            }
            prop_assert_eq!(
                order.settlement_ref.is_some(),
                order.status == OrderStatus::Approved
            );
            prop_assert_eq!(order.total_due, 1000);
        }
    }
}
