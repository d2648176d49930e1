//! Post-settlement side effects.
//!
//! After an approval lands, the approver's proceeds may be deposited into a
//! yield venue. That deposit is a separate operation: its failure is logged
//! and counted, and reported as a warning on the approval receipt. It never
//! turns a successful approval into a failure.

use std::sync::Arc;

use parking_lot::Mutex;
use rwa_core::Address;
use rwa_ledger::{
    pda, BoxFuture, Operation, OperationRef, OperationSigner, ProgramIds, ReconcileProbe, Step,
    SubmissionClient,
};
use rwa_telemetry::Metrics;
use thiserror::Error;
use tracing::{info, warn};

/// A side effect that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Yield deposit failed: {message}")]
pub struct SideEffectFailed {
    pub message: String,
    pub logs: Vec<String>,
}

impl SideEffectFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            logs: Vec::new(),
        }
    }
}

/// Result of the post-settlement step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffectOutcome {
    Completed(OperationRef),
    /// Disabled or nothing to deposit.
    Skipped,
    Failed(SideEffectFailed),
}

impl SideEffectOutcome {
    /// Warning text for the caller, if the side effect failed.
    #[must_use]
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Failed(f) => Some(f.to_string()),
            _ => None,
        }
    }
}

// ============================================================================
// Yield venue
// ============================================================================

/// Where approval proceeds are deposited.
pub trait YieldVenue: Send + Sync {
    fn deposit<'a>(
        &'a self,
        signer: &'a dyn OperationSigner,
        venue: &'a Address,
        amount: u64,
    ) -> BoxFuture<'a, Result<OperationRef, SideEffectFailed>>;
}

pub type DynYieldVenue = Arc<dyn YieldVenue>;

/// Yield venue program on the ledger.
pub struct LedgerYieldVenue {
    submitter: SubmissionClient,
    programs: ProgramIds,
}

impl LedgerYieldVenue {
    #[must_use]
    pub fn new(submitter: SubmissionClient, programs: ProgramIds) -> Self {
        Self {
            submitter,
            programs,
        }
    }

    async fn deposit_inner(
        &self,
        signer: &dyn OperationSigner,
        venue: &Address,
        amount: u64,
    ) -> Result<OperationRef, SideEffectFailed> {
        let actor = signer.address();
        let account = pda::yield_account(&self.programs.yield_venue, &actor, venue)
            .map_err(|e| SideEffectFailed::new(e.to_string()))?;
        let exists = self
            .submitter
            .rpc()
            .account_exists(&account)
            .await
            .map_err(|e| SideEffectFailed::new(e.to_string()))?;

        let mut steps = Vec::with_capacity(2);
        if !exists {
            steps.push(Step::CreateYieldAccount {
                payer: actor,
                actor,
                venue: *venue,
                account,
            });
        }
        steps.push(Step::YieldDeposit {
            actor,
            venue: *venue,
            account,
            amount,
        });

        let op = Operation::new(actor, steps)
            .sign(signer)
            .map_err(|e| SideEffectFailed::new(e.to_string()))?;
        // A deposit has no state that proves it landed; ambiguity is a failure.
        match self.submitter.submit(&op, &ReconcileProbe::None).await {
            Ok(outcome) => Ok(outcome.reference().clone()),
            Err(rwa_ledger::LedgerError::SubmissionFailed { message, logs }) => {
                Err(SideEffectFailed { message, logs })
            }
            Err(other) => Err(SideEffectFailed::new(other.to_string())),
        }
    }
}

impl YieldVenue for LedgerYieldVenue {
    fn deposit<'a>(
        &'a self,
        signer: &'a dyn OperationSigner,
        venue: &'a Address,
        amount: u64,
    ) -> BoxFuture<'a, Result<OperationRef, SideEffectFailed>> {
        Box::pin(self.deposit_inner(signer, venue, amount))
    }
}

/// Recording venue for tests.
#[derive(Debug, Default)]
pub struct MockYieldVenue {
    fail: Mutex<Option<String>>,
    deposits: Mutex<Vec<(Address, Address, u64)>>,
}

impl MockYieldVenue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every deposit with `message` while set.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.fail.lock() = message.map(str::to_string);
    }

    /// Recorded `(actor, venue, amount)` deposits.
    #[must_use]
    pub fn deposits(&self) -> Vec<(Address, Address, u64)> {
        self.deposits.lock().clone()
    }
}

impl YieldVenue for MockYieldVenue {
    fn deposit<'a>(
        &'a self,
        signer: &'a dyn OperationSigner,
        venue: &'a Address,
        amount: u64,
    ) -> BoxFuture<'a, Result<OperationRef, SideEffectFailed>> {
        Box::pin(async move {
            if let Some(message) = self.fail.lock().clone() {
                return Err(SideEffectFailed::new(message));
            }
            let mut deposits = self.deposits.lock();
            deposits.push((signer.address(), *venue, amount));
            Ok(OperationRef::new(format!("mock-deposit-{}", deposits.len())))
        })
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs the configured side effect after a successful approval.
pub struct SideEffectDispatcher {
    venue: DynYieldVenue,
    venue_id: Address,
    enabled: bool,
}

impl SideEffectDispatcher {
    #[must_use]
    pub fn new(venue: DynYieldVenue, venue_id: Address, enabled: bool) -> Self {
        Self {
            venue,
            venue_id,
            enabled,
        }
    }

    /// Dispatcher that always skips.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Arc::new(MockYieldVenue::new()), Address::ZERO, false)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Deposit `amount` for `signer`. Never fails; the outcome says what happened.
    pub async fn dispatch(&self, signer: &dyn OperationSigner, amount: u64) -> SideEffectOutcome {
        if !self.enabled || amount == 0 {
            return SideEffectOutcome::Skipped;
        }
        match self.venue.deposit(signer, &self.venue_id, amount).await {
            Ok(reference) => {
                info!(reference = %reference, amount, "Proceeds deposited to yield venue");
                SideEffectOutcome::Completed(reference)
            }
            Err(failed) => {
                Metrics::side_effect_failed();
                warn!(
                    error = %failed.message,
                    logs = ?failed.logs,
                    amount,
                    "Yield deposit failed; settlement stands"
                );
                SideEffectOutcome::Failed(failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwa_ledger::{test_program_ids, KeypairSigner, MockLedger, ReconcilePolicy};

    #[tokio::test]
    async fn test_disabled_dispatcher_skips() {
        let signer = KeypairSigner::generate();
        let outcome = SideEffectDispatcher::disabled().dispatch(&signer, 100).await;
        assert_eq!(outcome, SideEffectOutcome::Skipped);
        assert!(outcome.warning().is_none());
    }

    #[tokio::test]
    async fn test_failure_becomes_warning() {
        let venue = Arc::new(MockYieldVenue::new());
        venue.set_failure(Some("venue paused"));
        let dispatcher = SideEffectDispatcher::new(venue.clone(), Address::new([5u8; 32]), true);
        let signer = KeypairSigner::generate();

        let outcome = dispatcher.dispatch(&signer, 100).await;
        assert!(matches!(outcome, SideEffectOutcome::Failed(_)));
        assert!(outcome.warning().unwrap().contains("venue paused"));
        assert!(venue.deposits().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_venue_opens_account_then_deposits() {
        let ledger = Arc::new(MockLedger::new(test_program_ids()));
        let programs = *ledger.programs();
        let venue = LedgerYieldVenue::new(
            SubmissionClient::new(ledger.clone(), ReconcilePolicy::default()),
            programs,
        );
        let signer = KeypairSigner::generate();
        ledger.fund(signer.address(), 1_000);
        let venue_id = Address::new([5u8; 32]);
        let account = pda::yield_account(&programs.yield_venue, &signer.address(), &venue_id)
            .unwrap();

        venue.deposit(&signer, &venue_id, 300).await.unwrap();
        venue.deposit(&signer, &venue_id, 200).await.unwrap();
        assert_eq!(ledger.yield_balance(&account), Some(500));
        assert_eq!(ledger.cash(&signer.address()), 500);
        assert_eq!(ledger.submissions()[0].operation.steps.len(), 2);
        assert_eq!(ledger.submissions()[1].operation.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_venue_failure_carries_logs() {
        let ledger = Arc::new(MockLedger::new(test_program_ids()));
        ledger.set_yield_unavailable(true);
        let venue = LedgerYieldVenue::new(
            SubmissionClient::new(ledger.clone(), ReconcilePolicy::default()),
            *ledger.programs(),
        );
        let signer = KeypairSigner::generate();
        ledger.fund(signer.address(), 1_000);

        let err = venue
            .deposit(&signer, &Address::new([5u8; 32]), 100)
            .await
            .unwrap_err();
        assert!(err.logs.iter().any(|l| l.contains("yield venue unavailable")));
    }
}
