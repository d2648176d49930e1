//! Reconciling submission client.
//!
//! The ledger may report "already processed" for an operation that actually
//! took effect (broadcast succeeded, acknowledgment lost), and a confirmation
//! may time out after a successful send. Both are ambiguous: the client
//! probes ledger state on a bounded backoff schedule and resolves the
//! submission as `Reconciled` if the effect is visible, or as a genuine
//! failure otherwise. Nothing is ever resubmitted.

use std::time::Duration;

use rwa_core::{Address, OrderStatus};
use rwa_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, LedgerResult, RpcError, RpcResult};
use crate::operation::{OperationRef, SignedOperation};
use crate::rpc::DynLedgerRpc;

/// Ledger message fragments that mark a duplicate submission.
///
/// The ledger exposes no error code for this case; its message text is the
/// only signal. Keep this list narrow and covered by contract tests against
/// the real endpoint's error formats.
const ALREADY_PROCESSED_MARKERS: &[&str] = &["already been processed", "already processed"];

/// Number of recent references inspected when recovering a reference.
const RECENT_REFS_LIMIT: usize = 10;

// ============================================================================
// Policy
// ============================================================================

fn default_grace_period_ms() -> u64 {
    2_000
}

fn default_max_probes() -> u32 {
    3
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    8_000
}

/// Upper bound on probes per ambiguous submission.
pub const MAX_RECONCILE_PROBES: u32 = 10;

/// Upper bound on any single delay between probes (ms).
pub const MAX_RECONCILE_DELAY_MS: u64 = 60_000;

/// Bounded reconciliation schedule.
///
/// The first probe runs after `grace_period_ms`; each following delay is
/// multiplied by `backoff_factor` and capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_max_probes")]
    pub max_probes: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            max_probes: default_max_probes(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconcilePolicy {
    /// Delay before each probe.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        let probes = self.max_probes.min(MAX_RECONCILE_PROBES);
        let cap = self.max_delay_ms.min(MAX_RECONCILE_DELAY_MS);
        let mut delays = Vec::with_capacity(probes as usize);
        let mut current = self.grace_period_ms.min(cap);
        for _ in 0..probes {
            delays.push(Duration::from_millis(current));
            current = current
                .saturating_mul(u64::from(self.backoff_factor.max(1)))
                .min(cap);
        }
        delays
    }
}

// ============================================================================
// Classification and outcomes
// ============================================================================

/// Narrow classification of a submission error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitErrorClass {
    /// Ledger says the operation was already processed; may have succeeded.
    AlreadyProcessed,
    /// Sent, but confirmation was not observed; may have succeeded.
    ConfirmationUnknown,
    /// Anything else: a genuine failure.
    Rejected,
}

impl SubmitErrorClass {
    #[must_use]
    pub fn classify(err: &RpcError) -> Self {
        match err {
            RpcError::Rejected { message, .. } => {
                let lower = message.to_ascii_lowercase();
                if ALREADY_PROCESSED_MARKERS.iter().any(|m| lower.contains(m)) {
                    Self::AlreadyProcessed
                } else {
                    Self::Rejected
                }
            }
            RpcError::ConfirmationUnknown(_) => Self::ConfirmationUnknown,
            RpcError::HttpClient(_) | RpcError::Decode(_) => Self::Rejected,
        }
    }

    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Ledger state that proves an ambiguous submission took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileProbe {
    /// No observable effect; ambiguous errors are treated as failures.
    None,
    /// The operation creates an account at this address.
    AccountExists(Address),
    /// The operation moves the order to `expected` (processed by `processed_by`, if set).
    OrderStatus {
        address: Address,
        expected: OrderStatus,
        processed_by: Option<Address>,
    },
}

/// Successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Confirmed by the ledger directly.
    Confirmed(OperationRef),
    /// Reported as a duplicate or unconfirmed, but the probe found the effect.
    /// `reference` is best-effort and for display only.
    Reconciled { reference: OperationRef, probes: u32 },
}

impl SubmitOutcome {
    #[must_use]
    pub fn reference(&self) -> &OperationRef {
        match self {
            Self::Confirmed(r) => r,
            Self::Reconciled { reference, .. } => reference,
        }
    }

    #[must_use]
    pub fn was_reconciled(&self) -> bool {
        matches!(self, Self::Reconciled { .. })
    }

    /// Metric outcome label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirmed(_) => "ok",
            Self::Reconciled { .. } => "reconciled",
        }
    }
}

// ============================================================================
// SubmissionClient
// ============================================================================

/// Submits signed operations and reconciles ambiguous errors.
pub struct SubmissionClient {
    rpc: DynLedgerRpc,
    policy: ReconcilePolicy,
}

impl SubmissionClient {
    #[must_use]
    pub fn new(rpc: DynLedgerRpc, policy: ReconcilePolicy) -> Self {
        Self { rpc, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    #[must_use]
    pub fn rpc(&self) -> &DynLedgerRpc {
        &self.rpc
    }

    /// Submit `op`; on an ambiguous error, check `probe` before failing.
    pub async fn submit(
        &self,
        op: &SignedOperation,
        probe: &ReconcileProbe,
    ) -> LedgerResult<SubmitOutcome> {
        let reference = op.reference();
        debug!(
            reference = %reference,
            steps = op.operation.steps.len(),
            "Submitting operation"
        );

        let err = match self.rpc.send_operation(op).await {
            Ok(confirmed) => {
                info!(reference = %confirmed, "Operation confirmed");
                return Ok(SubmitOutcome::Confirmed(confirmed));
            }
            Err(err) => err,
        };

        let class = SubmitErrorClass::classify(&err);
        if !class.is_ambiguous() {
            return Err(self.genuine_failure(op, err, true).await);
        }

        warn!(
            reference = %reference,
            class = ?class,
            error = %err,
            "Ambiguous submission result, reconciling"
        );

        match self.reconcile(probe).await {
            Some(probes) => {
                let recovered = self.recover_reference(op).await;
                warn!(
                    reference = %recovered,
                    probes,
                    "Submission reconciled: effect found on ledger"
                );
                Ok(SubmitOutcome::Reconciled {
                    reference: recovered,
                    probes,
                })
            }
            // Simulating a duplicate only reproduces the duplicate message.
            None => Err(self.genuine_failure(op, err, false).await),
        }
    }

    /// Probe on the policy schedule; `Some(probes)` once the effect is visible.
    async fn reconcile(&self, probe: &ReconcileProbe) -> Option<u32> {
        if matches!(probe, ReconcileProbe::None) {
            return None;
        }

        for (attempt, delay) in self.policy.delays().into_iter().enumerate() {
            tokio::time::sleep(delay).await;
            let probes = attempt as u32 + 1;
            match self.probe_once(probe).await {
                Ok(true) => {
                    Metrics::reconcile_probe("found");
                    return Some(probes);
                }
                Ok(false) => {
                    Metrics::reconcile_probe("absent");
                    debug!(probes, probe = ?probe, "Effect not visible yet");
                }
                Err(e) => {
                    Metrics::reconcile_probe("probe_error");
                    warn!(probes, error = %e, "Reconciliation probe failed");
                }
            }
        }
        None
    }

    async fn probe_once(&self, probe: &ReconcileProbe) -> RpcResult<bool> {
        match probe {
            ReconcileProbe::None => Ok(false),
            ReconcileProbe::AccountExists(address) => self.rpc.account_exists(address).await,
            ReconcileProbe::OrderStatus {
                address,
                expected,
                processed_by,
            } => {
                let order = self.rpc.fetch_order(address).await?;
                Ok(order.is_some_and(|o| {
                    o.status == *expected
                        && processed_by.map_or(true, |p| o.processed_by == Some(p))
                }))
            }
        }
    }

    /// Best-effort reference after reconciliation; never used for state.
    async fn recover_reference(&self, op: &SignedOperation) -> OperationRef {
        let own = op.reference();
        match self
            .rpc
            .recent_operation_refs(op.payer(), RECENT_REFS_LIMIT)
            .await
        {
            Ok(refs) if refs.contains(&own) => own,
            Ok(refs) => refs.into_iter().next().unwrap_or(own),
            Err(e) => {
                debug!(error = %e, "Could not list recent references");
                own
            }
        }
    }

    /// Wrap a genuine failure, attaching diagnostic logs when available.
    async fn genuine_failure(
        &self,
        op: &SignedOperation,
        err: RpcError,
        simulate: bool,
    ) -> LedgerError {
        let (message, mut logs) = match err {
            RpcError::Rejected { message, logs } => (message, logs),
            other => (other.to_string(), Vec::new()),
        };

        if logs.is_empty() && simulate {
            match self.rpc.simulate_logs(op).await {
                Ok(simulated) => logs = simulated,
                Err(e) => debug!(error = %e, "Could not fetch diagnostic logs"),
            }
        }

        error!(
            reference = %op.reference(),
            message = %message,
            logs = ?logs,
            "Operation failed"
        );
        LedgerError::SubmissionFailed { message, logs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rwa_core::AssetId;

    use crate::mock::{test_program_ids, MockLedger};
    use crate::operation::{Operation, Step};
    use crate::pda;
    use crate::signer::{KeypairSigner, OperationSigner};

    fn fast_policy() -> ReconcilePolicy {
        ReconcilePolicy {
            grace_period_ms: 1,
            max_probes: 3,
            backoff_factor: 2,
            max_delay_ms: 4,
        }
    }

    struct Fixture {
        ledger: Arc<MockLedger>,
        client: SubmissionClient,
        signer: KeypairSigner,
        op: SignedOperation,
        order: Address,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MockLedger::new(test_program_ids()));
        let signer = KeypairSigner::generate();
        ledger.fund(signer.address(), 10_000);
        let asset = AssetId::new(Address::new([1u8; 32]));
        let created_at = rwa_core::OrderTimestamp::new(42);
        let order = pda::order_address(
            &ledger.programs().order,
            &asset,
            &signer.address(),
            created_at,
        )
        .unwrap();
        let op = Operation::new(
            signer.address(),
            vec![Step::CreateOrder {
                order,
                requester: signer.address(),
                asset,
                quantity: 100,
                unit_price: 10,
                created_at,
                vault: Address::new([8u8; 32]),
            }],
        )
        .sign(&signer)
        .unwrap();
        let client = SubmissionClient::new(ledger.clone(), fast_policy());
        Fixture {
            ledger,
            client,
            signer,
            op,
            order,
        }
    }

    #[test]
    fn test_policy_delays_are_bounded() {
        let delays = ReconcilePolicy {
            grace_period_ms: 2_000,
            max_probes: 4,
            backoff_factor: 2,
            max_delay_ms: 5_000,
        }
        .delays();
        let ms: Vec<u64> = delays.iter().map(|d| d.as_millis() as u64).collect();
        assert_eq!(ms, vec![2_000, 4_000, 5_000, 5_000]);
    }

    #[test]
    fn test_policy_clamps_oversized_settings() {
        let delays = ReconcilePolicy {
            grace_period_ms: u64::MAX,
            max_probes: u32::MAX,
            backoff_factor: u32::MAX,
            max_delay_ms: u64::MAX,
        }
        .delays();
        assert_eq!(delays.len(), MAX_RECONCILE_PROBES as usize);
        assert!(delays
            .iter()
            .all(|d| *d == Duration::from_millis(MAX_RECONCILE_DELAY_MS)));
    }

    #[test]
    fn test_classify() {
        let dup = RpcError::rejected("Transaction simulation failed: This transaction has already been processed");
        assert_eq!(SubmitErrorClass::classify(&dup), SubmitErrorClass::AlreadyProcessed);
        assert_eq!(
            SubmitErrorClass::classify(&RpcError::rejected("custom program error: 0x1770")),
            SubmitErrorClass::Rejected
        );
        assert_eq!(
            SubmitErrorClass::classify(&RpcError::ConfirmationUnknown("timeout".into())),
            SubmitErrorClass::ConfirmationUnknown
        );
        assert_eq!(
            SubmitErrorClass::classify(&RpcError::HttpClient("connection refused".into())),
            SubmitErrorClass::Rejected
        );
    }

    #[tokio::test]
    async fn test_confirmed_submission() {
        let f = fixture();
        let outcome = f
            .client
            .submit(&f.op, &ReconcileProbe::AccountExists(f.order))
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Confirmed(f.op.reference()));
        assert!(f.ledger.order(&f.order).is_some());
    }

    #[tokio::test]
    async fn test_ack_race_reconciles_exactly_once() {
        let f = fixture();
        f.ledger.inject_ack_race();
        let outcome = f
            .client
            .submit(&f.op, &ReconcileProbe::AccountExists(f.order))
            .await
            .unwrap();
        assert!(outcome.was_reconciled());
        assert_eq!(outcome.reference(), &f.op.reference());
        assert_eq!(f.ledger.order_count(), 1);
        assert_eq!(f.ledger.applied_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_without_effect_is_genuine_failure() {
        let f = fixture();
        f.ledger
            .fail_next_send(RpcError::rejected("This transaction has already been processed"));
        let err = f
            .client
            .submit(&f.op, &ReconcileProbe::AccountExists(f.order))
            .await
            .unwrap_err();
        match err {
            LedgerError::SubmissionFailed { message, .. } => {
                assert!(message.contains("already been processed"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.ledger.order_count(), 0);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_reconciles() {
        let f = fixture();
        f.ledger.inject_lost_confirmation();
        let outcome = f
            .client
            .submit(&f.op, &ReconcileProbe::AccountExists(f.order))
            .await
            .unwrap();
        assert!(outcome.was_reconciled());
    }

    #[tokio::test]
    async fn test_rejection_carries_simulated_logs() {
        let f = fixture();
        // Drain the requester so the earnest deposit cannot be paid.
        f.ledger.set_cash(f.signer.address(), 5);
        let err = f
            .client
            .submit(&f.op, &ReconcileProbe::AccountExists(f.order))
            .await
            .unwrap_err();
        match err {
            LedgerError::SubmissionFailed { logs, .. } => {
                assert!(logs.iter().any(|l| l.contains("insufficient funds")))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_probe_means_no_reconciliation() {
        let f = fixture();
        f.ledger.inject_ack_race();
        let err = f.client.submit(&f.op, &ReconcileProbe::None).await;
        assert!(matches!(err, Err(LedgerError::SubmissionFailed { .. })));
        // The effect still happened on the ledger; only the caller saw a failure.
        assert_eq!(f.ledger.order_count(), 1);
    }
}
