//! Compliance registry boundary.
//!
//! Restricted assets run policy checks inside their own transfer. The
//! transfer step must therefore carry the asset's validation accounts:
//! the asset configuration, the offering, and the eligibility registry
//! entries of both parties. This crate resolves them.

pub mod error;
pub mod mock;
pub mod program;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use mock::MockRegistry;
pub use program::ProgramDerivedRegistry;
pub use registry::{
    resolve_transfer_accounts, AssetPolicyAccounts, ComplianceRegistry, DynComplianceRegistry,
    TransferHookAccounts,
};
