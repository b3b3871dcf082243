use serde::{Deserialize, Serialize};

use super::offering::Offering;
use super::purchase::{LifecycleState, PurchaseFact};

/// Aggregate state of the app's single subscription group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionGroupStatus {
    Subscribed,
    Revoked,
    Expired,
    InBillingRetryPeriod,
    InGracePeriod,
    #[default]
    None,
}

impl SubscriptionGroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionGroupStatus::Subscribed => "subscribed",
            SubscriptionGroupStatus::Revoked => "revoked",
            SubscriptionGroupStatus::Expired => "expired",
            SubscriptionGroupStatus::InBillingRetryPeriod => "in_billing_retry_period",
            SubscriptionGroupStatus::InGracePeriod => "in_grace_period",
            SubscriptionGroupStatus::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subscribed" => Some(SubscriptionGroupStatus::Subscribed),
            "revoked" => Some(SubscriptionGroupStatus::Revoked),
            "expired" => Some(SubscriptionGroupStatus::Expired),
            "in_billing_retry_period" => Some(SubscriptionGroupStatus::InBillingRetryPeriod),
            "in_grace_period" => Some(SubscriptionGroupStatus::InGracePeriod),
            "none" => Some(SubscriptionGroupStatus::None),
            _ => None,
        }
    }

    pub fn from_lifecycle(state: LifecycleState) -> Self {
        match state {
            LifecycleState::Active => SubscriptionGroupStatus::Subscribed,
            LifecycleState::Expired => SubscriptionGroupStatus::Expired,
            LifecycleState::Revoked => SubscriptionGroupStatus::Revoked,
            LifecycleState::InGracePeriod => SubscriptionGroupStatus::InGracePeriod,
            LifecycleState::InBillingRetryPeriod => SubscriptionGroupStatus::InBillingRetryPeriod,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    Terminal,
    Unverifiable,
    UnknownOffering,
}

/// A fact the evaluator refused to consider, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exclusion {
    pub transaction_id: String,
    pub offering_id: String,
    pub reason: ExclusionReason,
}

/// Output of one evaluation pass. Always replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntitlementDecision {
    pub winner: Option<Offering>,
    pub winning_fact: Option<PurchaseFact>,
    pub group_status: SubscriptionGroupStatus,
    /// A verified, non-revoked non-consumable purchase is among the facts.
    pub unlock_owned: bool,
    pub exclusions: Vec<Exclusion>,
}

impl EntitlementDecision {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn grants_premium(&self) -> bool {
        let winner_active = matches!(
            &self.winning_fact,
            Some(fact) if fact.state == LifecycleState::Active
        );
        winner_active || self.unlock_owned
    }

    pub fn winner_id(&self) -> Option<&str> {
        self.winner.as_ref().map(|o| o.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_status_round_trips_through_str() {
        for status in [
            SubscriptionGroupStatus::Subscribed,
            SubscriptionGroupStatus::Revoked,
            SubscriptionGroupStatus::Expired,
            SubscriptionGroupStatus::InBillingRetryPeriod,
            SubscriptionGroupStatus::InGracePeriod,
            SubscriptionGroupStatus::None,
        ] {
            assert_eq!(SubscriptionGroupStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubscriptionGroupStatus::parse("bogus"), None);
    }

    #[test]
    fn test_empty_decision_grants_nothing() {
        let decision = EntitlementDecision::none();
        assert!(!decision.grants_premium());
        assert_eq!(decision.group_status, SubscriptionGroupStatus::None);
        assert!(decision.winner_id().is_none());
    }

    #[test]
    fn test_unlock_alone_grants_premium() {
        let decision = EntitlementDecision { unlock_owned: true, ..Default::default() };
        assert!(decision.grants_premium());
    }
}
