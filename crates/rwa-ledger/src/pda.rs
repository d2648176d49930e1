//! Program-derived addresses.
//!
//! Every account the desk touches is addressed deterministically from seeds
//! under an owning program:
//!
//! ```text
//! address = sha256(seed_0 || .. || seed_n || bump || program || "ProgramDerivedAddress")
//! ```
//!
//! searching `bump` from 255 down to 0 for the first result that is not a
//! valid ed25519 point, so no private key can exist for it.

use ed25519_dalek::VerifyingKey;
use rwa_core::{Address, AssetId, OrderTimestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Maximum length of a single seed.
pub const MAX_SEED_LEN: usize = 32;
/// Maximum number of seeds (excluding the bump).
pub const MAX_SEEDS: usize = 16;

pub const ORDER_SEED: &[u8] = b"purchase_order";
pub const COMPLIANCE_CONFIG_SEED: &[u8] = b"srwa_config";
pub const OFFERING_SEED: &[u8] = b"offering";
pub const USER_REGISTRY_SEED: &[u8] = b"user_registry";
pub const YIELD_ACCOUNT_SEED: &[u8] = b"yield_account";

/// Program identities the desk drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramIds {
    /// Purchase order program (owns order records).
    pub order: Address,
    /// Restricted token program.
    pub token: Address,
    /// Holding-account program (derives per-owner asset accounts).
    pub holding: Address,
    /// Compliance program (transfer-hook validation accounts).
    pub compliance: Address,
    /// Yield venue program.
    pub yield_venue: Address,
}

fn is_on_curve(bytes: &[u8; 32]) -> bool {
    VerifyingKey::from_bytes(bytes).is_ok()
}

/// Derive an address for a specific bump; `None` if the hash lands on the curve.
pub fn create_program_address(
    seeds: &[&[u8]],
    bump: u8,
    program: &Address,
) -> LedgerResult<Option<Address>> {
    if seeds.len() > MAX_SEEDS {
        return Err(LedgerError::InvalidSeeds(format!(
            "{} seeds (max {MAX_SEEDS})",
            seeds.len()
        )));
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LEN) {
        return Err(LedgerError::InvalidSeeds(format!(
            "seed of {} bytes (max {MAX_SEED_LEN})",
            seed.len()
        )));
    }

    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update([bump]);
    hasher.update(program.as_bytes());
    hasher.update(PDA_MARKER);
    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        Ok(None)
    } else {
        Ok(Some(Address::new(hash)))
    }
}

/// Find the canonical (highest-bump) program address for `seeds`.
pub fn find_program_address(seeds: &[&[u8]], program: &Address) -> LedgerResult<(Address, u8)> {
    for bump in (0..=u8::MAX).rev() {
        if let Some(address) = create_program_address(seeds, bump, program)? {
            return Ok((address, bump));
        }
    }
    Err(LedgerError::NoViableBump)
}

/// Order record address: `["purchase_order", asset, requester, created_at_le]`.
pub fn order_address(
    program: &Address,
    asset: &AssetId,
    requester: &Address,
    created_at: OrderTimestamp,
) -> LedgerResult<Address> {
    let ts = created_at.to_le_bytes();
    let seeds: [&[u8]; 4] = [ORDER_SEED, asset.as_ref(), requester.as_ref(), &ts];
    find_program_address(&seeds, program).map(|(a, _)| a)
}

/// Holding account of `owner` for `asset`: `[owner, token_program, asset]`.
pub fn holding_account(programs: &ProgramIds, owner: &Address, asset: &AssetId) -> LedgerResult<Address> {
    let seeds: [&[u8]; 3] = [owner.as_ref(), programs.token.as_ref(), asset.as_ref()];
    find_program_address(&seeds, &programs.holding).map(|(a, _)| a)
}

/// Compliance configuration account for `asset`.
pub fn compliance_config(program: &Address, asset: &AssetId) -> LedgerResult<Address> {
    find_program_address(&[COMPLIANCE_CONFIG_SEED, asset.as_ref()], program).map(|(a, _)| a)
}

/// Offering account for `asset`.
pub fn offering_account(program: &Address, asset: &AssetId) -> LedgerResult<Address> {
    find_program_address(&[OFFERING_SEED, asset.as_ref()], program).map(|(a, _)| a)
}

/// Per-identity eligibility registry account.
pub fn user_registry(program: &Address, identity: &Address) -> LedgerResult<Address> {
    find_program_address(&[USER_REGISTRY_SEED, identity.as_ref()], program).map(|(a, _)| a)
}

/// Yield venue position account of `actor` at `venue`.
pub fn yield_account(program: &Address, actor: &Address, venue: &Address) -> LedgerResult<Address> {
    find_program_address(&[YIELD_ACCOUNT_SEED, actor.as_ref(), venue.as_ref()], program)
        .map(|(a, _)| a)
}
