//! Persisted entitlement state
//!
//! The reconciliation loop is the only writer. Each `write` replaces the
//! three flags together, so readers never see a mix of old and new values.

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use crate::database::Database;
use crate::error::{AppResult, PersistenceError};
use crate::models::{EntitlementDecision, PersistedEntitlement};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn read(&self) -> AppResult<PersistedEntitlement>;

    /// Persists `decision`. `premium_ever_activated` becomes
    /// `stored || sticky_activation` and is never cleared.
    async fn write(
        &self,
        decision: &EntitlementDecision,
        sticky_activation: bool,
    ) -> Result<PersistedEntitlement, PersistenceError>;
}

#[derive(Debug, Default)]
pub struct MemoryEntitlementStore {
    state: RwLock<PersistedEntitlement>,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedEntitlement) -> Self {
        Self { state: RwLock::new(state) }
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn read(&self) -> AppResult<PersistedEntitlement> {
        Ok(*self.state.read().await)
    }

    async fn write(
        &self,
        decision: &EntitlementDecision,
        sticky_activation: bool,
    ) -> Result<PersistedEntitlement, PersistenceError> {
        let mut state = self.state.write().await;
        *state = state.apply(decision, sticky_activation);
        debug!("Stored entitlement in memory: {:?}", *state);
        Ok(*state)
    }
}

/// Store backed by the SQLite key-value table.
#[derive(Clone)]
pub struct SqliteEntitlementStore {
    db: Database,
}

impl SqliteEntitlementStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntitlementStore for SqliteEntitlementStore {
    async fn read(&self) -> AppResult<PersistedEntitlement> {
        self.db.get_entitlement().await
    }

    async fn write(
        &self,
        decision: &EntitlementDecision,
        sticky_activation: bool,
    ) -> Result<PersistedEntitlement, PersistenceError> {
        self.db
            .put_entitlement(decision, sticky_activation)
            .await
            .map_err(|e| PersistenceError::WriteFailed(e.to_safe_string()))
    }
}
