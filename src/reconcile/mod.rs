//! Reconciliation loop
//!
//! One long-lived task per session turns the store's transaction stream into
//! a persisted entitlement. All evaluation and persistence runs on that task,
//! so passes never overlap and decisions are written in order.
//!
//! ```text
//!   idle ─► catalogLoading ─► listening ◄──────────────┐
//!                │               │                     │
//!                ▼               ▼                     │
//!             errored ──────► evaluating ─► persisting ┘
//!
//!   cancelled is terminal and reachable from every state
//! ```
//!
//! A catalog failure leaves the loop in `errored`. Transactions are still
//! consumed there, and the next `refresh()` retries the catalog.

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, PersistenceError, VerificationError};
use crate::models::{EntitlementDecision, PersistedEntitlement};

mod handle;
mod worker;
pub mod working_set;

pub use handle::{ReconcileHandle, ReconciliationLoop};
pub use working_set::WorkingSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    CatalogLoading,
    Listening,
    Evaluating,
    Persisting,
    /// Catalog unavailable; still listening for transactions.
    Errored,
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Cancelled)
    }

    pub fn can_transition_to(&self, next: LoopState) -> bool {
        use LoopState::*;
        match (*self, next) {
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            (Idle, CatalogLoading) => true,
            (CatalogLoading, Listening | Errored) => true,
            (Listening | Errored, Evaluating | CatalogLoading) => true,
            (Evaluating, Persisting | Listening | Errored) => true,
            (Persisting, Listening | Errored) => true,
            _ => false,
        }
    }
}

/// What caused a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassTrigger {
    Startup,
    Refresh,
    Transaction,
    Purchase,
}

/// Everything the host can observe about the engine at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: LoopState,
    pub entitlement: PersistedEntitlement,
    pub decision: Option<EntitlementDecision>,
    pub catalog_error: Option<CatalogError>,
    pub persist_error: Option<PersistenceError>,
}

impl EngineSnapshot {
    pub fn new(entitlement: PersistedEntitlement) -> Self {
        Self {
            state: LoopState::Idle,
            entitlement,
            decision: None,
            catalog_error: None,
            persist_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    PassCompleted {
        trigger: PassTrigger,
        premium: bool,
        winner: Option<String>,
    },
    /// The pass would have cleared premium without an authoritative view
    /// of the store, so nothing was written.
    PassDeferred {
        trigger: PassTrigger,
    },
    CatalogFailed(CatalogError),
    VerificationFailed {
        transaction_id: String,
        error: VerificationError,
    },
    PersistFailed(PersistenceError),
    Stopped,
}

// serde for the error types lives here so the taxonomy stays plain.
mod error_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    impl Serialize for CatalogError {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.to_string())
        }
    }

    impl<'de> Deserialize<'de> for CatalogError {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let message = String::deserialize(deserializer)?;
            Ok(match message.as_str() {
                "Catalog returned no offerings" => CatalogError::Empty,
                _ => CatalogError::Unavailable(message),
            })
        }
    }

    impl Serialize for PersistenceError {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.to_string())
        }
    }

    impl<'de> Deserialize<'de> for PersistenceError {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            Ok(PersistenceError::WriteFailed(String::deserialize(deserializer)?))
        }
    }
}
