//! Registry backed by program-derived addresses.
//!
//! Validation accounts are derived under the compliance program. Resolved
//! addresses are cached; when a ledger handle is attached, identity entries
//! are only cached after the ledger confirms the account exists.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rwa_core::{Address, AssetId};
use rwa_ledger::{pda, BoxFuture, DynLedgerRpc};
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::registry::{AssetPolicyAccounts, ComplianceRegistry};

/// Cached identity entry.
#[derive(Debug, Clone)]
pub struct RegistryCacheEntry {
    pub account: Address,
    pub resolved_at: DateTime<Utc>,
}

pub struct ProgramDerivedRegistry {
    program: Address,
    /// When set, identity accounts must exist on the ledger.
    ledger: Option<DynLedgerRpc>,
    assets: DashMap<AssetId, AssetPolicyAccounts>,
    identities: DashMap<Address, RegistryCacheEntry>,
}

impl ProgramDerivedRegistry {
    /// Pure derivation, no existence checks.
    #[must_use]
    pub fn new(program: Address) -> Self {
        Self {
            program,
            ledger: None,
            assets: DashMap::new(),
            identities: DashMap::new(),
        }
    }

    /// Derivation plus a ledger existence check per identity.
    #[must_use]
    pub fn with_ledger(program: Address, ledger: DynLedgerRpc) -> Self {
        Self {
            ledger: Some(ledger),
            ..Self::new(program)
        }
    }

    #[must_use]
    pub fn cached_identities(&self) -> usize {
        self.identities.len()
    }

    /// Drop a cached identity (e.g. after it was deregistered).
    pub fn invalidate(&self, identity: &Address) {
        self.identities.remove(identity);
    }

    fn derive_asset(&self, asset: &AssetId) -> RegistryResult<AssetPolicyAccounts> {
        if let Some(cached) = self.assets.get(asset) {
            return Ok(*cached);
        }
        let accounts = AssetPolicyAccounts {
            config: pda::compliance_config(&self.program, asset)
                .map_err(|e| RegistryError::Derivation(e.to_string()))?,
            offering: pda::offering_account(&self.program, asset)
                .map_err(|e| RegistryError::Derivation(e.to_string()))?,
        };
        self.assets.insert(*asset, accounts);
        Ok(accounts)
    }

    async fn resolve_identity(&self, identity: &Address) -> RegistryResult<Address> {
        if let Some(entry) = self.identities.get(identity) {
            return Ok(entry.account);
        }

        let account = pda::user_registry(&self.program, identity)
            .map_err(|e| RegistryError::Derivation(e.to_string()))?;

        if let Some(ledger) = &self.ledger {
            if !ledger.account_exists(&account).await? {
                warn!(identity = %identity, "Identity has no registry entry");
                return Err(RegistryError::NotRegistered(*identity));
            }
        }

        debug!(identity = %identity.short(), account = %account.short(), "Registry entry resolved");
        self.identities.insert(
            *identity,
            RegistryCacheEntry {
                account,
                resolved_at: Utc::now(),
            },
        );
        Ok(account)
    }
}

impl ComplianceRegistry for ProgramDerivedRegistry {
    fn asset_accounts<'a>(&'a self, asset: &'a AssetId) -> BoxFuture<'a, RegistryResult<AssetPolicyAccounts>> {
        Box::pin(async move { self.derive_asset(asset) })
    }

    fn identity_account<'a>(&'a self, identity: &'a Address) -> BoxFuture<'a, RegistryResult<Address>> {
        Box::pin(self.resolve_identity(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rwa_ledger::{test_program_ids, MockLedger};

    use crate::registry::resolve_transfer_accounts;

    fn asset() -> AssetId {
        AssetId::new(Address::new([1u8; 32]))
    }

    #[tokio::test]
    async fn test_pure_registry_matches_derivation() {
        let program = Address::new([5u8; 32]);
        let registry = ProgramDerivedRegistry::new(program);
        let from = Address::new([2u8; 32]);
        let to = Address::new([3u8; 32]);

        let accounts = resolve_transfer_accounts(&registry, &asset(), &from, &to)
            .await
            .unwrap();
        assert_eq!(accounts.config, pda::compliance_config(&program, &asset()).unwrap());
        assert_eq!(accounts.offering, pda::offering_account(&program, &asset()).unwrap());
        assert_eq!(accounts.from_registry, pda::user_registry(&program, &from).unwrap());
        assert_eq!(accounts.to_registry, pda::user_registry(&program, &to).unwrap());
        assert_eq!(registry.cached_identities(), 2);
    }

    #[tokio::test]
    async fn test_ledger_backed_registry_rejects_unregistered() {
        let programs = test_program_ids();
        let ledger = Arc::new(MockLedger::new(programs));
        let registry = ProgramDerivedRegistry::with_ledger(programs.compliance, ledger);
        let identity = Address::new([4u8; 32]);

        let err = registry.identity_account(&identity).await.unwrap_err();
        assert_eq!(err, RegistryError::NotRegistered(identity));
        assert_eq!(registry.cached_identities(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_drops_cache_entry() {
        let registry = ProgramDerivedRegistry::new(Address::new([5u8; 32]));
        let identity = Address::new([4u8; 32]);
        registry.identity_account(&identity).await.unwrap();
        registry.invalidate(&identity);
        assert_eq!(registry.cached_identities(), 0);
    }
}
