//! Settlement builder.
//!
//! Turns "approve order X" into one atomic operation: optionally create the
//! requester's holding account, then transfer the asset with its full set of
//! compliance validation accounts and mark the order approved. Every
//! precondition is checked here, before anything is signed, so a missing
//! precondition surfaces as a named error with zero submissions.

use rwa_compliance::{resolve_transfer_accounts, DynComplianceRegistry, TransferHookAccounts};
use rwa_core::{Address, Order};
use rwa_ledger::{pda, DynLedgerRpc, Operation, ProgramIds, Step, TransferStep};
use tracing::{debug, info};

use crate::error::{DeskError, DeskResult};

/// Unsigned approval operation plus what went into it.
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    /// Order as read before building.
    pub order: Order,
    pub operation: Operation,
    /// Whether the operation opens the requester's holding account.
    pub creates_holding_account: bool,
    pub hook_accounts: TransferHookAccounts,
}

pub struct SettlementBuilder {
    rpc: DynLedgerRpc,
    registry: DynComplianceRegistry,
    programs: ProgramIds,
    vault: Address,
}

impl SettlementBuilder {
    #[must_use]
    pub fn new(
        rpc: DynLedgerRpc,
        registry: DynComplianceRegistry,
        programs: ProgramIds,
        vault: Address,
    ) -> Self {
        Self {
            rpc,
            registry,
            programs,
            vault,
        }
    }

    /// Fetch `address` and require it to be pending.
    pub async fn pending_order(&self, address: &Address) -> DeskResult<Order> {
        let order = self
            .rpc
            .fetch_order(address)
            .await?
            .ok_or(DeskError::OrderNotFound(*address))?;
        if !order.is_pending() {
            return Err(DeskError::StaleOrderState {
                address: *address,
                status: order.status,
            });
        }
        Ok(order)
    }

    /// `StaleOrderState` if `address` has been resolved by anyone but `actor`.
    pub async fn resolved_elsewhere(&self, address: &Address, actor: &Address) -> Option<DeskError> {
        match self.rpc.fetch_order(address).await {
            Ok(Some(order)) if !order.is_pending() && order.processed_by != Some(*actor) => {
                Some(DeskError::StaleOrderState {
                    address: *address,
                    status: order.status,
                })
            }
            Ok(_) => None,
            Err(e) => {
                debug!(order = %address.short(), error = %e, "Could not re-read order after failure");
                None
            }
        }
    }

    /// Build the approval of `order_address` by `approver`.
    pub async fn build_approval(
        &self,
        order_address: &Address,
        approver: &Address,
    ) -> DeskResult<SettlementPlan> {
        let order = self.pending_order(order_address).await?;
        let asset = order.asset;

        let source = holding(&self.programs, approver, &order)?;
        let available = self
            .rpc
            .token_balance(&source)
            .await?
            .ok_or(DeskError::SourceAccountMissing {
                owner: *approver,
                asset,
            })?;
        if available < order.quantity {
            return Err(DeskError::InsufficientBalance {
                required: order.quantity,
                available,
            });
        }

        let destination = holding(&self.programs, &order.requester, &order)?;
        let creates_holding_account = !self.rpc.account_exists(&destination).await?;

        let hook_accounts =
            resolve_transfer_accounts(self.registry.as_ref(), &asset, approver, &order.requester)
                .await?;

        let mut steps = Vec::with_capacity(2);
        if creates_holding_account {
            debug!(
                owner = %order.requester.short(),
                account = %destination.short(),
                "Requester holding account missing, creating it in the same operation"
            );
            steps.push(Step::CreateHoldingAccount {
                payer: *approver,
                owner: order.requester,
                asset,
                account: destination,
            });
        }
        steps.push(Step::ApproveAndTransfer {
            order: *order_address,
            approver: *approver,
            vault: self.vault,
            transfer: TransferStep {
                from: source,
                to: destination,
                authority: *approver,
                asset,
                amount: order.quantity,
                extra_accounts: hook_accounts.to_vec(),
            },
        });

        info!(
            order = %order_address.short(),
            approver = %approver.short(),
            quantity = order.quantity,
            steps = steps.len(),
            "Built settlement"
        );

        Ok(SettlementPlan {
            order,
            operation: Operation::new(*approver, steps),
            creates_holding_account,
            hook_accounts,
        })
    }
}

fn holding(programs: &ProgramIds, owner: &Address, order: &Order) -> DeskResult<Address> {
    Ok(pda::holding_account(programs, owner, &order.asset)?)
}
