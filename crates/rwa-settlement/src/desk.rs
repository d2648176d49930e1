//! Order desk.
//!
//! Drives the four lifecycle operations end to end:
//!
//! - create: derive a fresh address, build and submit the create step
//! - approve: compliance-gated settlement, then the yield side effect
//! - reject / cancel: status change with escrow refund
//!
//! Each operation takes the signer explicitly, claims its single-flight keys
//! for its whole duration, records metrics and, on success, schedules a
//! background refresh of the order store.

use std::sync::Arc;
use std::time::Instant;

use rwa_compliance::DynComplianceRegistry;
use rwa_core::{
    compute_total_due, validate_reject_reason, Address, AssetId, CoreError, Order, OrderStatus,
    OrderTimestamp, SettlementRef,
};
use rwa_ledger::{
    AddressDeriver, DynLedgerRpc, Operation, OperationRef, OperationSigner, ProgramIds,
    ReconcilePolicy, ReconcileProbe, SignedOperation, Step, SubmissionClient, SubmitOutcome,
    SystemTimeSource, TimeSource,
};
use rwa_telemetry::Metrics;
use tracing::{info, warn};

use crate::builder::SettlementBuilder;
use crate::error::{DeskError, DeskResult};
use crate::side_effect::{SideEffectDispatcher, SideEffectOutcome};
use crate::single_flight::{FlightKey, OperationKind, SingleFlight};
use crate::store::OrderStore;

// ============================================================================
// Settings and receipts
// ============================================================================

/// Static desk settings.
#[derive(Debug, Clone)]
pub struct DeskSettings {
    pub programs: ProgramIds,
    /// Escrow account holding earnest deposits until approval.
    pub proceeds_vault: Address,
    pub reconcile: ReconcilePolicy,
    /// Refresh the order store in the background after every successful operation.
    pub auto_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReceipt {
    pub order_address: Address,
    pub created_at: OrderTimestamp,
    pub total_due: u64,
    /// Display only when `reconciled`.
    pub reference: OperationRef,
    pub reconciled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalReceipt {
    pub order_address: Address,
    pub settlement_ref: SettlementRef,
    pub reconciled: bool,
    pub created_holding_account: bool,
    pub side_effect: SideEffectOutcome,
}

impl ApprovalReceipt {
    /// Non-fatal warnings to show the caller.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.side_effect.warning().into_iter().collect()
    }
}

/// Receipt for reject and cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReceipt {
    pub order_address: Address,
    pub status: OrderStatus,
    pub reference: OperationRef,
    pub reconciled: bool,
}

// ============================================================================
// OrderDesk
// ============================================================================

pub struct OrderDesk<T: TimeSource = SystemTimeSource> {
    submitter: SubmissionClient,
    builder: SettlementBuilder,
    store: Arc<OrderStore>,
    flights: SingleFlight,
    side_effects: SideEffectDispatcher,
    deriver: AddressDeriver<T>,
    vault: Address,
    auto_refresh: bool,
}

impl OrderDesk<SystemTimeSource> {
    #[must_use]
    pub fn new(
        rpc: DynLedgerRpc,
        registry: DynComplianceRegistry,
        side_effects: SideEffectDispatcher,
        settings: DeskSettings,
    ) -> Self {
        Self::with_time_source(rpc, registry, side_effects, settings, SystemTimeSource::new())
    }
}

impl<T: TimeSource> OrderDesk<T> {
    #[must_use]
    pub fn with_time_source(
        rpc: DynLedgerRpc,
        registry: DynComplianceRegistry,
        side_effects: SideEffectDispatcher,
        settings: DeskSettings,
        time: T,
    ) -> Self {
        let programs = settings.programs;
        Self {
            submitter: SubmissionClient::new(Arc::clone(&rpc), settings.reconcile),
            builder: SettlementBuilder::new(
                Arc::clone(&rpc),
                registry,
                programs,
                settings.proceeds_vault,
            ),
            store: Arc::new(OrderStore::new(rpc, programs.order)),
            flights: SingleFlight::new(),
            side_effects,
            deriver: AddressDeriver::new(programs.order, time),
            vault: settings.proceeds_vault,
            auto_refresh: settings.auto_refresh,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    #[must_use]
    pub fn flights(&self) -> &SingleFlight {
        &self.flights
    }

    #[must_use]
    pub fn deriver(&self) -> &AddressDeriver<T> {
        &self.deriver
    }

    /// Create a pending order for `quantity` units of `asset` at `unit_price`.
    pub async fn create(
        &self,
        signer: &dyn OperationSigner,
        asset: AssetId,
        quantity: u64,
        unit_price: u64,
    ) -> DeskResult<CreateReceipt> {
        let started = Instant::now();
        let result = self.create_inner(signer, asset, quantity, unit_price).await;
        self.finish(
            OperationKind::Create,
            started,
            result.as_ref().map(|r| r.reconciled),
        );
        result
    }

    /// Approve `order` with the signer as approver and asset source.
    pub async fn approve(
        &self,
        signer: &dyn OperationSigner,
        order: Address,
    ) -> DeskResult<ApprovalReceipt> {
        let started = Instant::now();
        let result = self.approve_inner(signer, order).await;
        self.finish(
            OperationKind::Approve,
            started,
            result.as_ref().map(|r| r.reconciled),
        );
        result
    }

    /// Reject `order` with `reason` (at most 200 characters).
    pub async fn reject(
        &self,
        signer: &dyn OperationSigner,
        order: Address,
        reason: &str,
    ) -> DeskResult<OperationReceipt> {
        let started = Instant::now();
        let result = self.reject_inner(signer, order, reason).await;
        self.finish(
            OperationKind::Reject,
            started,
            result.as_ref().map(|r| r.reconciled),
        );
        result
    }

    /// Cancel `order`; the signer must be its requester.
    pub async fn cancel(
        &self,
        signer: &dyn OperationSigner,
        order: Address,
    ) -> DeskResult<OperationReceipt> {
        let started = Instant::now();
        let result = self.cancel_inner(signer, order).await;
        self.finish(
            OperationKind::Cancel,
            started,
            result.as_ref().map(|r| r.reconciled),
        );
        result
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    async fn create_inner(
        &self,
        signer: &dyn OperationSigner,
        asset: AssetId,
        quantity: u64,
        unit_price: u64,
    ) -> DeskResult<CreateReceipt> {
        let requester = signer.address();
        let _flight = self.flights.try_begin(
            OperationKind::Create,
            &[FlightKey::Actor {
                kind: OperationKind::Create,
                actor: requester,
            }],
        )?;

        let total_due = compute_total_due(quantity, unit_price)?;
        let (order_address, created_at) = self.deriver.derive(&asset, &requester)?;

        let op = Operation::new(
            requester,
            vec![Step::CreateOrder {
                order: order_address,
                requester,
                asset,
                quantity,
                unit_price,
                created_at,
                vault: self.vault,
            }],
        )
        .sign(signer)?;

        let outcome = self
            .submitter
            .submit(&op, &ReconcileProbe::AccountExists(order_address))
            .await?;

        info!(
            order = %order_address,
            requester = %requester.short(),
            asset = %asset,
            quantity,
            unit_price,
            total_due,
            "Order created"
        );
        Ok(CreateReceipt {
            order_address,
            created_at,
            total_due,
            reconciled: outcome.was_reconciled(),
            reference: outcome.reference().clone(),
        })
    }

    async fn approve_inner(
        &self,
        signer: &dyn OperationSigner,
        order_address: Address,
    ) -> DeskResult<ApprovalReceipt> {
        let approver = signer.address();
        let _flight = self.flights.try_begin(
            OperationKind::Approve,
            &[
                FlightKey::Actor {
                    kind: OperationKind::Approve,
                    actor: approver,
                },
                FlightKey::Order(order_address),
            ],
        )?;

        let plan = self.builder.build_approval(&order_address, &approver).await?;
        let op = plan.operation.sign(signer)?;
        let outcome = self
            .resolve(
                &op,
                order_address,
                approver,
                ReconcileProbe::OrderStatus {
                    address: order_address,
                    expected: OrderStatus::Approved,
                    processed_by: Some(approver),
                },
            )
            .await?;

        info!(
            order = %order_address,
            approver = %approver.short(),
            reference = %outcome.reference(),
            reconciled = outcome.was_reconciled(),
            "Order approved"
        );

        let side_effect = self.side_effects.dispatch(signer, plan.order.total_due).await;

        Ok(ApprovalReceipt {
            order_address,
            settlement_ref: SettlementRef::from(outcome.reference().clone()),
            reconciled: outcome.was_reconciled(),
            created_holding_account: plan.creates_holding_account,
            side_effect,
        })
    }

    async fn reject_inner(
        &self,
        signer: &dyn OperationSigner,
        order_address: Address,
        reason: &str,
    ) -> DeskResult<OperationReceipt> {
        validate_reject_reason(reason)?;
        let approver = signer.address();
        let _flight = self.flights.try_begin(
            OperationKind::Reject,
            &[
                FlightKey::Actor {
                    kind: OperationKind::Reject,
                    actor: approver,
                },
                FlightKey::Order(order_address),
            ],
        )?;

        self.builder.pending_order(&order_address).await?;
        let op = Operation::new(
            approver,
            vec![Step::RejectOrder {
                order: order_address,
                approver,
                vault: self.vault,
                reason: reason.to_string(),
            }],
        )
        .sign(signer)?;
        let outcome = self
            .resolve(
                &op,
                order_address,
                approver,
                ReconcileProbe::OrderStatus {
                    address: order_address,
                    expected: OrderStatus::Rejected,
                    processed_by: Some(approver),
                },
            )
            .await?;

        info!(order = %order_address, approver = %approver.short(), "Order rejected");
        Ok(receipt(order_address, OrderStatus::Rejected, &outcome))
    }

    async fn cancel_inner(
        &self,
        signer: &dyn OperationSigner,
        order_address: Address,
    ) -> DeskResult<OperationReceipt> {
        let requester = signer.address();
        let _flight = self.flights.try_begin(
            OperationKind::Cancel,
            &[
                FlightKey::Actor {
                    kind: OperationKind::Cancel,
                    actor: requester,
                },
                FlightKey::Order(order_address),
            ],
        )?;

        let order: Order = self.builder.pending_order(&order_address).await?;
        if order.requester != requester {
            return Err(CoreError::UnauthorizedCancel.into());
        }

        let op = Operation::new(
            requester,
            vec![Step::CancelOrder {
                order: order_address,
                requester,
                vault: self.vault,
            }],
        )
        .sign(signer)?;
        let outcome = self
            .resolve(
                &op,
                order_address,
                requester,
                ReconcileProbe::OrderStatus {
                    address: order_address,
                    expected: OrderStatus::Cancelled,
                    processed_by: None,
                },
            )
            .await?;

        info!(order = %order_address, requester = %requester.short(), "Order cancelled");
        Ok(receipt(order_address, OrderStatus::Cancelled, &outcome))
    }

    /// Submit an operation that resolves the order at `address`.
    ///
    /// Another desk may resolve the order between our pending check and the
    /// ledger applying this operation. The ledger then rejects ours, and the
    /// caller sees the order as stale instead of a raw rejection.
    async fn resolve(
        &self,
        op: &SignedOperation,
        address: Address,
        actor: Address,
        probe: ReconcileProbe,
    ) -> DeskResult<SubmitOutcome> {
        let err = match self.submitter.submit(op, &probe).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => DeskError::from(e),
        };
        if !matches!(err, DeskError::SubmissionFailed { .. }) {
            return Err(err);
        }
        match self.builder.resolved_elsewhere(&address, &actor).await {
            Some(stale) => {
                info!(order = %address, error = %err, "Order resolved by another operator");
                Err(stale)
            }
            None => Err(err),
        }
    }

    /// Metrics, logging and the follow-up refresh for one finished operation.
    fn finish(&self, kind: OperationKind, started: Instant, result: Result<bool, &DeskError>) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Metrics::operation_latency(kind.as_str(), elapsed_ms);
        match result {
            Ok(reconciled) => {
                let outcome = if reconciled { "reconciled" } else { "ok" };
                Metrics::operation(kind.as_str(), outcome);
                if self.auto_refresh {
                    self.store.spawn_refresh();
                }
            }
            Err(e) => {
                Metrics::operation(kind.as_str(), "failed");
                warn!(
                    kind = %kind,
                    error = %e,
                    precondition = e.is_precondition(),
                    "Operation failed"
                );
            }
        }
    }
}

fn receipt(order_address: Address, status: OrderStatus, outcome: &SubmitOutcome) -> OperationReceipt {
    OperationReceipt {
        order_address,
        status,
        reference: outcome.reference().clone(),
        reconciled: outcome.was_reconciled(),
    }
}
