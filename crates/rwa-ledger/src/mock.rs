//! In-memory ledger for tests.
//!
//! Applies operations with the same rules the on-ledger programs enforce:
//! atomic multi-step operations, order status transitions, earnest deposit
//! escrow and refunds, holding-account balances, transfer-hook validation
//! accounts and yield positions. Faults can be injected per send.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rwa_core::{Address, AssetId, Order, SettlementRef};
use sha2::{Digest, Sha256};

use crate::error::{RpcError, RpcResult};
use crate::operation::{OperationRef, SignedOperation, Step, TransferStep};
use crate::pda::{self, ProgramIds};
use crate::rpc::{BoxFuture, LedgerRpc};

/// Message the mock returns for duplicate submissions.
pub const ALREADY_PROCESSED_MESSAGE: &str =
    "Transaction simulation failed: This transaction has already been processed";

/// Deterministic program ids for tests.
#[must_use]
pub fn test_program_ids() -> ProgramIds {
    fn id(label: &str) -> Address {
        Address::new(Sha256::digest(label.as_bytes()).into())
    }
    ProgramIds {
        order: id("program:purchase_order"),
        token: id("program:token"),
        holding: id("program:holding"),
        compliance: id("program:compliance"),
        yield_venue: id("program:yield"),
    }
}

#[derive(Debug)]
enum Fault {
    /// Apply the operation, then report it as already processed.
    AckRace,
    /// Apply the operation, then report the confirmation as unknown.
    LostConfirmation,
    /// Do not apply; return this error.
    Fail(RpcError),
}

#[derive(Debug, Default, Clone)]
struct LedgerState {
    orders: HashMap<Address, Order>,
    /// Holding account -> asset balance.
    holdings: HashMap<Address, u64>,
    /// Identity or vault -> settlement currency.
    cash: HashMap<Address, u64>,
    /// Yield position account -> deposited amount.
    yield_accounts: HashMap<Address, u64>,
    processed: HashSet<OperationRef>,
    /// Address -> references, newest first.
    history: HashMap<Address, Vec<OperationRef>>,
}

impl LedgerState {
    fn debit(&mut self, who: &Address, amount: u64, what: &str) -> Result<(), String> {
        let have = self.cash.get(who).copied().unwrap_or(0);
        if have < amount {
            return Err(format!(
                "insufficient funds for {what}: need {amount}, have {have}"
            ));
        }
        self.cash.insert(*who, have - amount);
        Ok(())
    }

    fn credit(&mut self, who: &Address, amount: u64) {
        *self.cash.entry(*who).or_insert(0) += amount;
    }

    fn exists(&self, address: &Address) -> bool {
        self.orders.contains_key(address)
            || self.holdings.contains_key(address)
            || self.yield_accounts.contains_key(address)
    }
}

/// In-memory `LedgerRpc` implementation.
pub struct MockLedger {
    programs: ProgramIds,
    state: Mutex<LedgerState>,
    faults: Mutex<VecDeque<Fault>>,
    submissions: Mutex<Vec<SignedOperation>>,
    applied: AtomicUsize,
    send_delay: Mutex<Option<Duration>>,
    list_delays: Mutex<VecDeque<Duration>>,
    list_failure: AtomicBool,
    yield_unavailable: AtomicBool,
    ineligible: Mutex<HashSet<Address>>,
}

impl MockLedger {
    #[must_use]
    pub fn new(programs: ProgramIds) -> Self {
        Self {
            programs,
            state: Mutex::new(LedgerState::default()),
            faults: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            applied: AtomicUsize::new(0),
            send_delay: Mutex::new(None),
            list_delays: Mutex::new(VecDeque::new()),
            list_failure: AtomicBool::new(false),
            yield_unavailable: AtomicBool::new(false),
            ineligible: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn programs(&self) -> &ProgramIds {
        &self.programs
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Add settlement currency to `who`.
    pub fn fund(&self, who: Address, amount: u64) {
        self.state.lock().credit(&who, amount);
    }

    pub fn set_cash(&self, who: Address, amount: u64) {
        self.state.lock().cash.insert(who, amount);
    }

    /// Credit `amount` of `asset` to `owner`, creating the holding account.
    pub fn mint_to(&self, owner: &Address, asset: &AssetId, amount: u64) -> Address {
        let account = self.holding_address(owner, asset);
        *self.state.lock().holdings.entry(account).or_insert(0) += amount;
        account
    }

    /// Mark `identity` as failing the asset's eligibility check.
    pub fn set_ineligible(&self, identity: Address) {
        self.ineligible.lock().insert(identity);
    }

    pub fn set_yield_unavailable(&self, unavailable: bool) {
        self.yield_unavailable.store(unavailable, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Next send applies, then reports "already processed".
    pub fn inject_ack_race(&self) {
        self.faults.lock().push_back(Fault::AckRace);
    }

    /// Next send applies, then reports an unknown confirmation.
    pub fn inject_lost_confirmation(&self) {
        self.faults.lock().push_back(Fault::LostConfirmation);
    }

    /// Next send fails with `err` without applying.
    pub fn fail_next_send(&self, err: RpcError) {
        self.faults.lock().push_back(Fault::Fail(err));
    }

    /// Delay every send by `delay` before applying.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *self.send_delay.lock() = delay;
    }

    /// Delay the next `list_orders` call.
    pub fn push_list_delay(&self, delay: Duration) {
        self.list_delays.lock().push_back(delay);
    }

    pub fn set_list_failure(&self, fail: bool) {
        self.list_failure.store(fail, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn order(&self, address: &Address) -> Option<Order> {
        self.state.lock().orders.get(address).cloned()
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    #[must_use]
    pub fn cash(&self, who: &Address) -> u64 {
        self.state.lock().cash.get(who).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn holding_balance(&self, owner: &Address, asset: &AssetId) -> Option<u64> {
        let account = self.holding_address(owner, asset);
        self.state.lock().holdings.get(&account).copied()
    }

    #[must_use]
    pub fn yield_balance(&self, account: &Address) -> Option<u64> {
        self.state.lock().yield_accounts.get(account).copied()
    }

    /// Every operation handed to `send_operation`, including failed ones.
    #[must_use]
    pub fn submissions(&self) -> Vec<SignedOperation> {
        self.submissions.lock().clone()
    }

    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Operations that took effect.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    fn holding_address(&self, owner: &Address, asset: &AssetId) -> Address {
        // Seeds are fixed-size; derivation only fails on malformed seeds.
        pda::holding_account(&self.programs, owner, asset).unwrap_or(Address::ZERO)
    }

    // ------------------------------------------------------------------
    // Program semantics
    // ------------------------------------------------------------------

    /// Apply all steps to a copy of `state`; returns the copy and the logs.
    fn execute(
        &self,
        state: &LedgerState,
        op: &SignedOperation,
    ) -> (Result<LedgerState, String>, Vec<String>) {
        let mut working = state.clone();
        let mut logs = Vec::new();
        let payer = *op.payer();
        let reference = op.reference();

        for (idx, step) in op.operation.steps.iter().enumerate() {
            logs.push(format!("Program log: Instruction: {}", step.name()));
            if let Err(e) = self.apply_step(&mut working, step, &payer, &reference) {
                logs.push(format!("Program log: Error: {e}"));
                logs.push(format!("Step {idx} failed"));
                return (Err(format!("Error processing step {idx}: {e}")), logs);
            }
        }
        logs.push("Program log: success".to_string());
        (Ok(working), logs)
    }

    fn apply_step(
        &self,
        s: &mut LedgerState,
        step: &Step,
        payer: &Address,
        reference: &OperationRef,
    ) -> Result<(), String> {
        let now = chrono::Utc::now().timestamp();
        let map_pda = |e: crate::error::LedgerError| e.to_string();

        match step {
            Step::CreateOrder {
                order,
                requester,
                asset,
                quantity,
                unit_price,
                created_at,
                vault,
            } => {
                require_signer(requester, payer)?;
                let expected =
                    pda::order_address(&self.programs.order, asset, requester, *created_at)
                        .map_err(map_pda)?;
                if expected != *order {
                    return Err("ConstraintSeeds: order address mismatch".into());
                }
                if s.exists(order) {
                    return Err(format!("account {order} already in use"));
                }
                let record = Order::new_pending(
                    *order,
                    *requester,
                    *asset,
                    *quantity,
                    *unit_price,
                    *created_at,
                    now,
                )
                .map_err(|e| e.to_string())?;
                s.debit(requester, record.total_due, "earnest deposit")?;
                s.credit(vault, record.total_due);
                s.orders.insert(*order, record);
                s.history.entry(*order).or_default().insert(0, reference.clone());
            }

            Step::CreateHoldingAccount {
                payer: account_payer,
                owner,
                asset,
                account,
            } => {
                require_signer(account_payer, payer)?;
                let expected = pda::holding_account(&self.programs, owner, asset).map_err(map_pda)?;
                if expected != *account {
                    return Err("holding account address mismatch".into());
                }
                if s.exists(account) {
                    return Err(format!("account {account} already in use"));
                }
                s.holdings.insert(*account, 0);
            }

            Step::ApproveAndTransfer {
                order,
                approver,
                vault,
                transfer,
            } => {
                require_signer(approver, payer)?;
                let mut record = s
                    .orders
                    .get(order)
                    .cloned()
                    .ok_or_else(|| format!("AccountNotInitialized: order {order}"))?;
                if !record.is_pending() {
                    return Err(format!("NotPending: order is {}", record.status));
                }
                self.check_transfer(&record, approver, transfer)?;

                let from_balance = s
                    .holdings
                    .get(&transfer.from)
                    .copied()
                    .ok_or("source holding account not initialized")?;
                if !s.holdings.contains_key(&transfer.to) {
                    return Err("destination holding account not initialized".into());
                }
                if from_balance < transfer.amount {
                    return Err(format!(
                        "InsufficientAdminTokens: need {}, have {from_balance}",
                        transfer.amount
                    ));
                }
                s.holdings.insert(transfer.from, from_balance - transfer.amount);
                *s.holdings.entry(transfer.to).or_insert(0) += transfer.amount;

                s.debit(vault, record.total_due, "proceeds release")?;
                s.credit(approver, record.total_due);

                record
                    .approve(*approver, SettlementRef::from(reference.clone()), now)
                    .map_err(|e| e.to_string())?;
                s.orders.insert(*order, record);
                s.history.entry(*order).or_default().insert(0, reference.clone());
            }

            Step::RejectOrder {
                order,
                approver,
                vault,
                reason,
            } => {
                require_signer(approver, payer)?;
                let mut record = s
                    .orders
                    .get(order)
                    .cloned()
                    .ok_or_else(|| format!("AccountNotInitialized: order {order}"))?;
                record
                    .reject(*approver, reason, now)
                    .map_err(|e| e.to_string())?;
                s.debit(vault, record.total_due, "refund")?;
                s.credit(&record.requester, record.total_due);
                s.orders.insert(*order, record);
                s.history.entry(*order).or_default().insert(0, reference.clone());
            }

            Step::CancelOrder {
                order,
                requester,
                vault,
            } => {
                require_signer(requester, payer)?;
                let mut record = s
                    .orders
                    .get(order)
                    .cloned()
                    .ok_or_else(|| format!("AccountNotInitialized: order {order}"))?;
                record.cancel(*requester, now).map_err(|e| e.to_string())?;
                s.debit(vault, record.total_due, "refund")?;
                s.credit(requester, record.total_due);
                s.orders.insert(*order, record);
                s.history.entry(*order).or_default().insert(0, reference.clone());
            }

            Step::CreateYieldAccount {
                payer: account_payer,
                actor,
                venue,
                account,
            } => {
                require_signer(account_payer, payer)?;
                self.require_yield_available()?;
                let expected = pda::yield_account(&self.programs.yield_venue, actor, venue)
                    .map_err(map_pda)?;
                if expected != *account {
                    return Err("yield account address mismatch".into());
                }
                if s.exists(account) {
                    return Err(format!("account {account} already in use"));
                }
                s.yield_accounts.insert(*account, 0);
            }

            Step::YieldDeposit {
                actor,
                account,
                amount,
                ..
            } => {
                require_signer(actor, payer)?;
                self.require_yield_available()?;
                if !s.yield_accounts.contains_key(account) {
                    return Err("yield account not initialized".into());
                }
                s.debit(actor, *amount, "yield deposit")?;
                *s.yield_accounts.entry(*account).or_insert(0) += amount;
            }
        }
        Ok(())
    }

    /// Transfer shape and transfer-hook validation.
    fn check_transfer(
        &self,
        record: &Order,
        approver: &Address,
        transfer: &TransferStep,
    ) -> Result<(), String> {
        if transfer.asset != record.asset {
            return Err("transfer asset does not match order".into());
        }
        if transfer.amount != record.quantity {
            return Err("InvalidQuantity: transfer amount does not match order".into());
        }
        if transfer.authority != *approver {
            return Err("transfer authority must be the approver".into());
        }
        let map_pda = |e: crate::error::LedgerError| e.to_string();
        let from = pda::holding_account(&self.programs, approver, &record.asset).map_err(map_pda)?;
        let to = pda::holding_account(&self.programs, &record.requester, &record.asset)
            .map_err(map_pda)?;
        if transfer.from != from || transfer.to != to {
            return Err("transfer accounts do not match approver/requester".into());
        }

        let compliance = &self.programs.compliance;
        let expected = vec![
            pda::compliance_config(compliance, &record.asset).map_err(map_pda)?,
            pda::offering_account(compliance, &record.asset).map_err(map_pda)?,
            pda::user_registry(compliance, approver).map_err(map_pda)?,
            pda::user_registry(compliance, &record.requester).map_err(map_pda)?,
        ];
        if transfer.extra_accounts != expected {
            return Err("transfer hook: missing or invalid validation accounts".into());
        }
        if self.ineligible.lock().contains(&record.requester) {
            return Err("transfer hook: recipient not eligible".into());
        }
        Ok(())
    }

    fn require_yield_available(&self) -> Result<(), String> {
        if self.yield_unavailable.load(Ordering::SeqCst) {
            Err("yield venue unavailable".into())
        } else {
            Ok(())
        }
    }

    /// Apply `op` atomically against live state.
    fn submit(&self, op: &SignedOperation) -> RpcResult<OperationRef> {
        if !op.verify() {
            return Err(RpcError::rejected("signature verification failed"));
        }
        let reference = op.reference();
        let mut state = self.state.lock();
        if state.processed.contains(&reference) {
            return Err(RpcError::rejected(ALREADY_PROCESSED_MESSAGE));
        }
        let (result, _logs) = self.execute(&state, op);
        let mut next = result.map_err(RpcError::rejected)?;
        next.processed.insert(reference.clone());
        next.history
            .entry(*op.payer())
            .or_default()
            .insert(0, reference.clone());
        *state = next;
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(reference)
    }
}

fn require_signer(expected: &Address, payer: &Address) -> Result<(), String> {
    if expected == payer {
        Ok(())
    } else {
        Err(format!("MissingRequiredSignature: {expected}"))
    }
}

impl LedgerRpc for MockLedger {
    fn send_operation<'a>(&'a self, op: &'a SignedOperation) -> BoxFuture<'a, RpcResult<OperationRef>> {
        Box::pin(async move {
            self.submissions.lock().push(op.clone());
            let delay = *self.send_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let fault = self.faults.lock().pop_front();
            if let Some(Fault::Fail(err)) = fault {
                return Err(err);
            }
            let result = self.submit(op);
            match (fault, result) {
                (Some(Fault::AckRace), Ok(_)) => Err(RpcError::rejected(ALREADY_PROCESSED_MESSAGE)),
                (Some(Fault::LostConfirmation), Ok(_)) => Err(RpcError::ConfirmationUnknown(
                    "confirmation not observed before timeout".into(),
                )),
                (_, result) => result,
            }
        })
    }

    fn account_exists<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, RpcResult<bool>> {
        Box::pin(async move { Ok(self.state.lock().exists(address)) })
    }

    fn token_balance<'a>(&'a self, account: &'a Address) -> BoxFuture<'a, RpcResult<Option<u64>>> {
        Box::pin(async move { Ok(self.state.lock().holdings.get(account).copied()) })
    }

    fn recent_operation_refs<'a>(
        &'a self,
        address: &'a Address,
        limit: usize,
    ) -> BoxFuture<'a, RpcResult<Vec<OperationRef>>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .history
                .get(address)
                .map(|refs| refs.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn simulate_logs<'a>(&'a self, op: &'a SignedOperation) -> BoxFuture<'a, RpcResult<Vec<String>>> {
        Box::pin(async move {
            let state = self.state.lock();
            let (_, logs) = self.execute(&state, op);
            Ok(logs)
        })
    }

    fn list_orders<'a>(&'a self, program: &'a Address) -> BoxFuture<'a, RpcResult<Vec<Order>>> {
        Box::pin(async move {
            let delay = self.list_delays.lock().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.list_failure.load(Ordering::SeqCst) {
                return Err(RpcError::HttpClient("injected list failure".into()));
            }
            if *program != self.programs.order {
                return Ok(Vec::new());
            }
            let mut orders: Vec<Order> = self.state.lock().orders.values().cloned().collect();
            orders.sort_by_key(|o| o.created_at);
            Ok(orders)
        })
    }

    fn fetch_order<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, RpcResult<Option<Order>>> {
        Box::pin(async move { Ok(self.state.lock().orders.get(address).cloned()) })
    }
}
