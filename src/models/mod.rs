pub mod decision;
pub mod entitlement;
pub mod offering;
pub mod purchase;

// Flatten so callers can write `use crate::models::Offering`.
pub use decision::{EntitlementDecision, Exclusion, ExclusionReason, SubscriptionGroupStatus};
pub use entitlement::PersistedEntitlement;
pub use offering::{
    IntroductoryOffer, Offering, OfferingKind, PaymentMode, PeriodUnit, SubscriptionPeriod,
};
pub use purchase::{
    LifecycleState, PurchaseFact, PurchaseOutcome, TransactionClaim, TransactionEvent,
    VerificationOutcome,
};
