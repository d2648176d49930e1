//! Application wiring.
//!
//! Builds the order desk from configuration: HTTP ledger gateway, program
//! derived compliance registry, ledger-backed yield venue. Tests assemble
//! the same desk over in-memory backends with `Application::with_backends`.

use std::sync::Arc;

use rwa_compliance::{DynComplianceRegistry, ProgramDerivedRegistry};
use rwa_ledger::{
    DynLedgerRpc, JsonRpcLedger, KeyManager, KeypairSigner, SubmissionClient,
};
use rwa_settlement::{
    DeskSettings, DynYieldVenue, LedgerYieldVenue, OrderDesk, SideEffectDispatcher,
};
use tracing::info;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

pub struct Application {
    config: AppConfig,
    desk: OrderDesk,
}

impl Application {
    /// Wire the desk against the configured ledger endpoint.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let rpc: DynLedgerRpc = Arc::new(JsonRpcLedger::with_timeouts(
            &config.rpc_url,
            config.rpc.timeout(),
            config.rpc.confirm_timeout(),
        )?);
        let registry: DynComplianceRegistry = Arc::new(ProgramDerivedRegistry::with_ledger(
            config.programs.compliance,
            Arc::clone(&rpc),
        ));
        let venue: DynYieldVenue = Arc::new(LedgerYieldVenue::new(
            SubmissionClient::new(Arc::clone(&rpc), config.reconcile.clone()),
            config.programs,
        ));

        info!(
            rpc_url = %config.rpc_url,
            order_program = %config.programs.order,
            side_effect = config.side_effect.enabled,
            "Order desk configured"
        );
        Ok(Self::with_backends(config, rpc, registry, venue))
    }

    /// Wire the desk over the given backends.
    #[must_use]
    pub fn with_backends(
        config: AppConfig,
        rpc: DynLedgerRpc,
        registry: DynComplianceRegistry,
        venue: DynYieldVenue,
    ) -> Self {
        let side_effects =
            SideEffectDispatcher::new(venue, config.yield_venue(), config.side_effect.enabled);
        let settings = DeskSettings {
            programs: config.programs,
            proceeds_vault: config.proceeds_vault,
            reconcile: config.reconcile.clone(),
            auto_refresh: config.refresh.auto_refresh,
        };
        let desk = OrderDesk::new(rpc, registry, side_effects, settings);
        Self { config, desk }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn desk(&self) -> &OrderDesk {
        &self.desk
    }

    /// Load the operator key named in the configuration.
    pub fn load_signer(&self) -> AppResult<KeypairSigner> {
        let source = self
            .config
            .signer
            .as_ref()
            .ok_or_else(|| AppError::Config("no [signer] configured".into()))?;
        let keys = KeyManager::load(source, self.config.signer_address)?;
        info!(signer = %keys.address().short(), "Signer loaded");
        Ok(keys.into_signer())
    }
}
