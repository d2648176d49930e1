//! Ledger operations.
//!
//! An `Operation` is an ordered list of steps applied atomically by the
//! ledger: either every step takes effect or none does. The signing message
//! is the SHA-256 of the operation's MessagePack encoding; the resulting
//! signature doubles as the operation reference.

use std::fmt;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rwa_core::{Address, AssetId, OrderTimestamp, SettlementRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};
use crate::signer::OperationSigner;

// ============================================================================
// Steps
// ============================================================================

/// Asset transfer between two holding accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStep {
    /// Source holding account.
    pub from: Address,
    /// Destination holding account.
    pub to: Address,
    /// Owner of the source account.
    pub authority: Address,
    pub asset: AssetId,
    pub amount: u64,
    /// Validation accounts required by the asset's transfer hook, in order.
    pub extra_accounts: Vec<Address>,
}

/// One step of an atomic operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Create a pending order and move `quantity * unit_price` into `vault`.
    CreateOrder {
        order: Address,
        requester: Address,
        asset: AssetId,
        quantity: u64,
        unit_price: u64,
        created_at: OrderTimestamp,
        vault: Address,
    },
    /// Create the holding account of `owner` for `asset`, paid by `payer`.
    CreateHoldingAccount {
        payer: Address,
        owner: Address,
        asset: AssetId,
        account: Address,
    },
    /// Transfer the asset to the requester and mark the order approved.
    /// The order's escrowed payment is released from `vault` to the approver.
    ApproveAndTransfer {
        order: Address,
        approver: Address,
        vault: Address,
        transfer: TransferStep,
    },
    /// Mark the order rejected and refund the requester from `vault`.
    RejectOrder {
        order: Address,
        approver: Address,
        vault: Address,
        reason: String,
    },
    /// Mark the order cancelled and refund the requester from `vault`.
    CancelOrder {
        order: Address,
        requester: Address,
        vault: Address,
    },
    /// Open a yield position account for `actor` at `venue`.
    CreateYieldAccount {
        payer: Address,
        actor: Address,
        venue: Address,
        account: Address,
    },
    /// Deposit `amount` of settlement currency into a yield position.
    YieldDeposit {
        actor: Address,
        venue: Address,
        account: Address,
        amount: u64,
    },
}

impl Step {
    /// Short name for logs and metrics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateOrder { .. } => "create_order",
            Self::CreateHoldingAccount { .. } => "create_holding_account",
            Self::ApproveAndTransfer { .. } => "approve_and_transfer",
            Self::RejectOrder { .. } => "reject_order",
            Self::CancelOrder { .. } => "cancel_order",
            Self::CreateYieldAccount { .. } => "create_yield_account",
            Self::YieldDeposit { .. } => "yield_deposit",
        }
    }
}

// ============================================================================
// Operation
// ============================================================================

/// An unsigned atomic operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Fee payer and signer.
    pub payer: Address,
    /// Issue time in ms; distinguishes otherwise identical operations.
    pub issued_at_ms: i64,
    pub steps: Vec<Step>,
}

impl Operation {
    #[must_use]
    pub fn new(payer: Address, steps: Vec<Step>) -> Self {
        Self {
            payer,
            issued_at_ms: chrono::Utc::now().timestamp_millis(),
            steps,
        }
    }

    /// Signing message: SHA-256 of the MessagePack encoding.
    pub fn message(&self) -> LedgerResult<[u8; 32]> {
        let encoded =
            rmp_serde::to_vec_named(self).map_err(|e| LedgerError::Encode(e.to_string()))?;
        Ok(Sha256::digest(&encoded).into())
    }

    /// Sign with `signer`, which must be the payer.
    pub fn sign(self, signer: &dyn OperationSigner) -> LedgerResult<SignedOperation> {
        if signer.address() != self.payer {
            return Err(LedgerError::SignerMismatch {
                signer: signer.address(),
                payer: self.payer,
            });
        }
        let message = self.message()?;
        let signature = OperationSignature(signer.sign(&message));
        Ok(SignedOperation {
            operation: self,
            signature,
        })
    }
}

/// 64-byte ed25519 signature, hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationSignature(pub [u8; 64]);

impl fmt::Debug for OperationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationSignature({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for OperationSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for OperationSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Self(arr))
    }
}

/// A signed operation ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOperation {
    pub operation: Operation,
    pub signature: OperationSignature,
}

impl SignedOperation {
    /// Reference under which the ledger records this operation.
    #[must_use]
    pub fn reference(&self) -> OperationRef {
        OperationRef(hex::encode(self.signature.0))
    }

    #[must_use]
    pub fn payer(&self) -> &Address {
        &self.operation.payer
    }

    /// Check the signature against the payer's key.
    #[must_use]
    pub fn verify(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(self.operation.payer.as_bytes()) else {
            return false;
        };
        let Ok(message) = self.operation.message() else {
            return false;
        };
        key.verify(&message, &Signature::from_bytes(&self.signature.0))
            .is_ok()
    }
}

/// Reference to a submitted ledger operation (hex signature).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationRef(String);

impl OperationRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<OperationRef> for SettlementRef {
    fn from(r: OperationRef) -> Self {
        SettlementRef::new(r.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::KeypairSigner;

    fn cancel_op(payer: Address) -> Operation {
        Operation {
            payer,
            issued_at_ms: 1,
            steps: vec![Step::CancelOrder {
                order: Address::new([1u8; 32]),
                requester: payer,
                vault: Address::new([2u8; 32]),
            }],
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = KeypairSigner::generate();
        let signed = cancel_op(signer.address()).sign(&signer).unwrap();
        assert!(signed.verify());
        assert_eq!(signed.reference().as_str().len(), 128);
    }

    #[test]
    fn test_tampered_operation_fails_verification() {
        let signer = KeypairSigner::generate();
        let mut signed = cancel_op(signer.address()).sign(&signer).unwrap();
        signed.operation.issued_at_ms = 2;
        assert!(!signed.verify());
    }

    #[test]
    fn test_signer_must_be_payer() {
        let signer = KeypairSigner::generate();
        assert!(matches!(
            cancel_op(Address::new([3u8; 32])).sign(&signer),
            Err(LedgerError::SignerMismatch { .. })
        ));
    }

    #[test]
    fn test_identical_operations_share_reference() {
        let signer = KeypairSigner::generate();
        let a = cancel_op(signer.address()).sign(&signer).unwrap();
        let b = cancel_op(signer.address()).sign(&signer).unwrap();
        assert_eq!(a.reference(), b.reference());
    }

    #[test]
    fn test_signed_operation_json() {
        let signer = KeypairSigner::generate();
        let signed = cancel_op(signer.address()).sign(&signer).unwrap();
        let json = serde_json::to_value(&signed).unwrap();
        assert_eq!(json["operation"]["steps"][0]["step"], "cancel_order");
        let back: SignedOperation = serde_json::from_value(json).unwrap();
        assert!(back.verify());
    }
}
