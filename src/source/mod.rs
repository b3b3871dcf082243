// Transaction source module
// Ports to the platform store: the update stream, status queries, purchases
// and the signature check that turns a claim into a trusted fact.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{AppResult, PurchaseError, VerificationError};
use crate::models::{PurchaseFact, PurchaseOutcome, TransactionEvent};

pub mod local;
pub mod signature;

pub use local::{LocalTransactionSource, PurchaseScript};
pub use signature::{sign_claim, SharedSecretVerifier};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Opens the update stream. Dropping the receiver ends the subscription.
    async fn subscribe(&self) -> AppResult<mpsc::Receiver<TransactionEvent>>;

    /// Latest transaction for every product the user currently holds or held.
    async fn current_statuses(&self) -> AppResult<Vec<TransactionEvent>>;

    async fn purchase(&self, offering_id: &str) -> Result<PurchaseOutcome, PurchaseError>;

    /// Marks a transaction finished so the store stops redelivering it.
    async fn acknowledge(&self, transaction_id: &str) -> AppResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionVerifier: Send + Sync {
    async fn verify(&self, event: &TransactionEvent) -> Result<PurchaseFact, VerificationError>;
}
