//! Test world: desk application over mock ledger, registry and yield venue.

use std::sync::Arc;

use rwa_compliance::MockRegistry;
use rwa_core::{Address, AssetId, Order};
use rwa_desk::{AppConfig, Application};
use rwa_ledger::{test_program_ids, KeypairSigner, MockLedger, OperationSigner, ReconcilePolicy};
use rwa_settlement::{MockYieldVenue, OrderDesk};

pub const VAULT: Address = Address::new([8u8; 32]);
pub const VENUE: Address = Address::new([5u8; 32]);

pub struct World {
    pub ledger: Arc<MockLedger>,
    pub registry: Arc<MockRegistry>,
    pub venue: Arc<MockYieldVenue>,
    pub app: Application,
    pub asset: AssetId,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let programs = test_program_ids();
        let mut config = AppConfig {
            programs,
            proceeds_vault: VAULT,
            reconcile: ReconcilePolicy {
                grace_period_ms: 5,
                max_probes: 3,
                backoff_factor: 2,
                max_delay_ms: 20,
            },
            ..AppConfig::default()
        };
        config.side_effect.enabled = true;
        config.side_effect.venue = Some(VENUE);
        config.refresh.auto_refresh = false;
        adjust(&mut config);
        config.validate().expect("test config is valid");

        let ledger = Arc::new(MockLedger::new(programs));
        let registry = Arc::new(MockRegistry::new(programs.compliance));
        let venue = Arc::new(MockYieldVenue::new());
        let app = Application::with_backends(
            config,
            ledger.clone(),
            registry.clone(),
            venue.clone(),
        );

        Self {
            ledger,
            registry,
            venue,
            app,
            asset: AssetId::new(Address::new([1u8; 32])),
        }
    }

    pub fn desk(&self) -> &OrderDesk {
        self.app.desk()
    }

    /// Another desk over the same ledger, as a second operator process.
    pub fn peer(&self) -> Application {
        Application::with_backends(
            self.app.config().clone(),
            self.ledger.clone(),
            self.registry.clone(),
            self.venue.clone(),
        )
    }

    /// Investor with `cash` of settlement currency.
    pub fn investor(&self, cash: u64) -> KeypairSigner {
        let signer = KeypairSigner::generate();
        self.ledger.fund(signer.address(), cash);
        signer
    }

    /// Administrator holding `units` of the asset.
    pub fn admin(&self, units: u64) -> KeypairSigner {
        let signer = KeypairSigner::generate();
        self.ledger.mint_to(&signer.address(), &self.asset, units);
        signer
    }

    pub fn order(&self, address: &Address) -> Order {
        self.ledger.order(address).expect("order exists on ledger")
    }
}
