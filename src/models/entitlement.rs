use serde::{Deserialize, Serialize};

use super::decision::{EntitlementDecision, SubscriptionGroupStatus};

/// Durable entitlement flags read by the rest of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PersistedEntitlement {
    pub premium: bool,
    /// Sticky: once true it never goes back to false.
    pub premium_ever_activated: bool,
    pub group_status: SubscriptionGroupStatus,
}

impl PersistedEntitlement {
    /// The state that results from writing `decision` on top of `self`.
    pub fn apply(&self, decision: &EntitlementDecision, sticky_activation: bool) -> Self {
        Self {
            premium: decision.grants_premium(),
            premium_ever_activated: self.premium_ever_activated || sticky_activation,
            group_status: decision.group_status,
        }
    }
}
