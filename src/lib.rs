// storesync library
// Subscription entitlement reconciliation: catalog, evaluator, loop and
// the persistence and transaction-source ports it is wired to.

pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod evaluator;
pub mod models;
pub mod reconcile;
pub mod source;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use catalog::{CatalogProvider, EntitlementCatalog, JsonCatalogProvider, StaticCatalogProvider};
pub use config::EngineConfig;
pub use database::Database;
pub use error::{
    AppError, AppResult, CatalogError, PersistenceError, PurchaseError, VerificationError,
};
pub use evaluator::evaluate;
pub use models::*;
pub use reconcile::{
    EngineSnapshot, LoopState, PassTrigger, ReconcileEvent, ReconcileHandle, ReconciliationLoop,
};
pub use source::{
    LocalTransactionSource, PurchaseScript, SharedSecretVerifier, TransactionSource,
    TransactionVerifier,
};
pub use store::{EntitlementStore, MemoryEntitlementStore, SqliteEntitlementStore};
