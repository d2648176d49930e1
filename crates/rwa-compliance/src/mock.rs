//! Mock registry for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rwa_core::{Address, AssetId};
use rwa_ledger::{pda, BoxFuture};

use crate::error::{RegistryError, RegistryResult};
use crate::registry::{AssetPolicyAccounts, ComplianceRegistry};

/// Derives accounts like the compliance program, with failure injection.
#[derive(Debug)]
pub struct MockRegistry {
    program: Address,
    /// Fail every lookup while set.
    fail_all: AtomicBool,
    /// Identities whose lookup fails.
    failing: Mutex<Vec<Address>>,
    lookups: AtomicUsize,
}

impl MockRegistry {
    #[must_use]
    pub fn new(program: Address) -> Self {
        Self {
            program,
            fail_all: AtomicBool::new(false),
            failing: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make lookups for `identity` fail.
    pub fn fail_identity(&self, identity: Address) {
        self.failing.lock().push(identity);
    }

    /// Total lookups served or failed.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check(&self) -> RegistryResult<()> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(RegistryError::Lookup("registry unavailable".into()));
        }
        Ok(())
    }
}

impl ComplianceRegistry for MockRegistry {
    fn asset_accounts<'a>(&'a self, asset: &'a AssetId) -> BoxFuture<'a, RegistryResult<AssetPolicyAccounts>> {
        Box::pin(async move {
            self.check()?;
            let derive = |r: rwa_ledger::LedgerResult<Address>| {
                r.map_err(|e| RegistryError::Derivation(e.to_string()))
            };
            Ok(AssetPolicyAccounts {
                config: derive(pda::compliance_config(&self.program, asset))?,
                offering: derive(pda::offering_account(&self.program, asset))?,
            })
        })
    }

    fn identity_account<'a>(&'a self, identity: &'a Address) -> BoxFuture<'a, RegistryResult<Address>> {
        Box::pin(async move {
            self.check()?;
            if self.failing.lock().contains(identity) {
                return Err(RegistryError::NotRegistered(*identity));
            }
            pda::user_registry(&self.program, identity)
                .map_err(|e| RegistryError::Derivation(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_injection() {
        let registry = MockRegistry::new(Address::new([5u8; 32]));
        let identity = Address::new([1u8; 32]);
        assert!(registry.identity_account(&identity).await.is_ok());

        registry.fail_identity(identity);
        assert_eq!(
            registry.identity_account(&identity).await,
            Err(RegistryError::NotRegistered(identity))
        );

        registry.set_fail_all(true);
        let asset = AssetId::new(identity);
        assert!(matches!(
            registry.asset_accounts(&asset).await,
            Err(RegistryError::Lookup(_))
        ));
        assert_eq!(registry.lookup_count(), 3);
    }
}
