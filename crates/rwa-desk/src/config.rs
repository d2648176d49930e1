//! Application configuration.

use std::path::Path;
use std::time::Duration;

use rwa_core::Address;
use rwa_ledger::{
    KeySource, ProgramIds, ReconcilePolicy, MAX_RECONCILE_DELAY_MS, MAX_RECONCILE_PROBES,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Default config path when neither `--config` nor `RWA_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable overriding the config path.
pub const CONFIG_ENV_VAR: &str = "RWA_CONFIG";

/// Ledger endpoint timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Read call timeout (ms). Default: 10,000.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Send-and-confirm timeout (ms). Default: 60,000.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_confirm_timeout_ms() -> u64 {
    60_000
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
        }
    }
}

impl RpcConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

/// Post-settlement yield deposit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideEffectConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Yield venue to deposit into; required when enabled.
    #[serde(default)]
    pub venue: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Refresh the order store after every successful operation. Default: true.
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
}

fn default_auto_refresh() -> bool {
    true
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            auto_refresh: default_auto_refresh(),
        }
    }
}

/// Decimal places used when reading and printing amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitsConfig {
    #[serde(default)]
    pub asset_decimals: u32,
    #[serde(default = "default_currency_decimals")]
    pub currency_decimals: u32,
}

fn default_currency_decimals() -> u32 {
    6
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            asset_decimals: 0,
            currency_decimals: default_currency_decimals(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Escrow account for earnest deposits.
    pub proceeds_vault: Address,
    /// Expected signer address; loading fails on mismatch.
    #[serde(default)]
    pub signer_address: Option<Address>,
    #[serde(default)]
    pub rpc: RpcConfig,
    pub programs: ProgramIds,
    #[serde(default)]
    pub reconcile: ReconcilePolicy,
    #[serde(default)]
    pub side_effect: SideEffectConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub units: UnitsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Where the operator key is read from. Required for mutating commands.
    #[serde(default)]
    pub signer: Option<KeySource>,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8899".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            proceeds_vault: Address::ZERO,
            signer_address: None,
            rpc: RpcConfig::default(),
            programs: ProgramIds {
                order: Address::ZERO,
                token: Address::ZERO,
                holding: Address::ZERO,
                compliance: Address::ZERO,
                yield_venue: Address::ZERO,
            },
            reconcile: ReconcilePolicy::default(),
            side_effect: SideEffectConfig::default(),
            refresh: RefreshConfig::default(),
            units: UnitsConfig::default(),
            telemetry: TelemetryConfig::default(),
            signer: None,
        }
    }
}

impl AppConfig {
    /// Load from `RWA_CONFIG` or the default path; defaults if the file is missing.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configurations the desk cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(AppError::Config("rpc_url is empty".into()));
        }
        let programs = [
            ("programs.order", self.programs.order),
            ("programs.token", self.programs.token),
            ("programs.holding", self.programs.holding),
            ("programs.compliance", self.programs.compliance),
            ("programs.yield_venue", self.programs.yield_venue),
            ("proceeds_vault", self.proceeds_vault),
        ];
        for (name, address) in programs {
            if address == Address::ZERO {
                return Err(AppError::Config(format!("{name} is not set")));
            }
        }
        if !(1..=MAX_RECONCILE_PROBES).contains(&self.reconcile.max_probes) {
            return Err(AppError::Config(format!(
                "reconcile.max_probes must be between 1 and {MAX_RECONCILE_PROBES}"
            )));
        }
        if self.reconcile.max_delay_ms > MAX_RECONCILE_DELAY_MS {
            return Err(AppError::Config(format!(
                "reconcile.max_delay_ms must be <= {MAX_RECONCILE_DELAY_MS}"
            )));
        }
        if self.reconcile.backoff_factor == 0 {
            return Err(AppError::Config(
                "reconcile.backoff_factor must be >= 1".into(),
            ));
        }
        if self.reconcile.grace_period_ms > self.reconcile.max_delay_ms {
            return Err(AppError::Config(
                "reconcile.grace_period_ms exceeds reconcile.max_delay_ms".into(),
            ));
        }
        if self.side_effect.enabled && self.side_effect.venue.is_none() {
            return Err(AppError::Config(
                "side_effect.venue is required when side_effect.enabled".into(),
            ));
        }
        if self.units.asset_decimals > 18 || self.units.currency_decimals > 18 {
            return Err(AppError::Config("units decimals must be <= 18".into()));
        }
        Ok(())
    }

    /// Venue id handed to the side-effect dispatcher.
    #[must_use]
    pub fn yield_venue(&self) -> Address {
        self.side_effect.venue.unwrap_or(Address::ZERO)
    }
}
