use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    Unverifiable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Expired,
    Revoked,
    InGracePeriod,
    InBillingRetryPeriod,
}

impl LifecycleState {
    /// Expired and revoked facts can never win an evaluation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Expired | LifecycleState::Revoked)
    }
}

/// The unsigned content of a transaction as the store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionClaim {
    pub transaction_id: String,
    pub offering_id: String,
    pub observed_at: DateTime<Utc>,
    pub state: LifecycleState,
    #[serde(default)]
    pub renewal_offering_id: Option<String>,
}

/// A signed claim delivered by the transaction source, not yet verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub claim: TransactionClaim,
    pub signature: String,
    /// Set when the store expects the app to finish this transaction.
    #[serde(default)]
    pub requires_acknowledgment: bool,
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> &str {
        &self.claim.transaction_id
    }

    /// Records the claim as a fact with the given verification outcome.
    pub fn to_fact(&self, verification: VerificationOutcome) -> PurchaseFact {
        PurchaseFact {
            transaction_id: self.claim.transaction_id.clone(),
            offering_id: self.claim.offering_id.clone(),
            verification,
            observed_at: self.claim.observed_at,
            state: self.claim.state,
            renewal_offering_id: self.claim.renewal_offering_id.clone(),
        }
    }
}

/// An observed claim about a purchase or renewal, tagged with whether it
/// could be verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseFact {
    pub transaction_id: String,
    pub offering_id: String,
    pub verification: VerificationOutcome,
    pub observed_at: DateTime<Utc>,
    pub state: LifecycleState,
    #[serde(default)]
    pub renewal_offering_id: Option<String>,
}

impl PurchaseFact {
    pub fn is_verified(&self) -> bool {
        self.verification == VerificationOutcome::Verified
    }

    /// True if `self` should replace `other` as the latest word on an offering.
    pub fn supersedes(&self, other: &PurchaseFact) -> bool {
        (self.observed_at, &self.transaction_id) > (other.observed_at, &other.transaction_id)
    }
}

/// What the transaction source reports back for a purchase request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Success(TransactionEvent),
    UserCancelled,
    Pending,
}
