//! Registry trait and resolved account sets.

use std::sync::Arc;

use rwa_core::{Address, AssetId};
use rwa_ledger::BoxFuture;
use tracing::debug;

use crate::error::RegistryResult;

/// Per-asset policy accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetPolicyAccounts {
    pub config: Address,
    pub offering: Address,
}

/// Everything the asset's transfer hook requires, for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferHookAccounts {
    pub config: Address,
    pub offering: Address,
    pub from_registry: Address,
    pub to_registry: Address,
}

impl TransferHookAccounts {
    /// Accounts in the order the transfer step lists them.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Address> {
        vec![
            self.config,
            self.offering,
            self.from_registry,
            self.to_registry,
        ]
    }
}

/// Keyed lookup of compliance validation accounts.
pub trait ComplianceRegistry: Send + Sync {
    /// Policy accounts of `asset`.
    fn asset_accounts<'a>(&'a self, asset: &'a AssetId) -> BoxFuture<'a, RegistryResult<AssetPolicyAccounts>>;

    /// Eligibility registry account of `identity`.
    fn identity_account<'a>(&'a self, identity: &'a Address) -> BoxFuture<'a, RegistryResult<Address>>;
}

pub type DynComplianceRegistry = Arc<dyn ComplianceRegistry>;

/// Resolve the hook accounts for a transfer of `asset` from `from` to `to`.
///
/// Both parties are looked up; any failure aborts the resolution.
pub async fn resolve_transfer_accounts(
    registry: &dyn ComplianceRegistry,
    asset: &AssetId,
    from: &Address,
    to: &Address,
) -> RegistryResult<TransferHookAccounts> {
    let policy = registry.asset_accounts(asset).await?;
    let from_registry = registry.identity_account(from).await?;
    let to_registry = registry.identity_account(to).await?;
    debug!(
        asset = %asset,
        from = %from.short(),
        to = %to.short(),
        "Resolved transfer hook accounts"
    );
    Ok(TransferHookAccounts {
        config: policy.config,
        offering: policy.offering,
        from_registry,
        to_registry,
    })
}
