//! Status evaluator
//!
//! Picks the single best active entitlement out of a set of purchase facts.
//! [`evaluate`] is a pure function: the same fact set, catalog and previous
//! winner always produce the same [`EntitlementDecision`], whatever order the
//! facts arrived in.

use std::cmp::Reverse;

use crate::models::{
    EntitlementDecision, Exclusion, ExclusionReason, LifecycleState, Offering, PurchaseFact,
    SubscriptionGroupStatus,
};

struct Candidate<'a> {
    catalog_index: usize,
    offering: &'a Offering,
    fact: &'a PurchaseFact,
}

/// Finds a fact's offering, preferring the one it will renew into.
fn resolve<'a>(fact: &PurchaseFact, catalog: &'a [Offering]) -> Option<(usize, &'a Offering)> {
    fact.renewal_offering_id
        .as_deref()
        .and_then(|id| position(catalog, id))
        .or_else(|| position(catalog, &fact.offering_id))
}

fn position<'a>(catalog: &'a [Offering], id: &str) -> Option<(usize, &'a Offering)> {
    catalog.iter().enumerate().find(|(_, o)| o.id == id)
}

fn exclude(fact: &PurchaseFact, reason: ExclusionReason) -> Exclusion {
    Exclusion {
        transaction_id: fact.transaction_id.clone(),
        offering_id: fact.offering_id.clone(),
        reason,
    }
}

pub fn evaluate(
    statuses: &[PurchaseFact],
    catalog: &[Offering],
    previous_winner: Option<&Offering>,
) -> EntitlementDecision {
    let mut exclusions = Vec::new();
    let mut candidates = Vec::new();

    for fact in statuses {
        if fact.state.is_terminal() {
            exclusions.push(exclude(fact, ExclusionReason::Terminal));
            continue;
        }
        if !fact.is_verified() {
            exclusions.push(exclude(fact, ExclusionReason::Unverifiable));
            continue;
        }
        match resolve(fact, catalog) {
            Some((catalog_index, offering)) => candidates.push(Candidate {
                catalog_index,
                offering,
                fact,
            }),
            None => exclusions.push(exclude(fact, ExclusionReason::UnknownOffering)),
        }
    }

    let previous_id = previous_winner.map(|o| o.id.as_str());

    // Tier first, then stickiness to the previous winner, then catalog order.
    // The fact fields only separate facts for the same offering.
    let best = candidates.iter().max_by_key(|c| {
        (
            c.offering.tier,
            Some(c.offering.id.as_str()) == previous_id,
            Reverse(c.catalog_index),
            c.fact.observed_at,
            c.fact.transaction_id.as_str(),
        )
    });

    let unlock_owned = statuses.iter().any(|fact| {
        fact.is_verified()
            && fact.state != LifecycleState::Revoked
            && catalog.iter().any(|o| o.id == fact.offering_id && o.is_unlock())
    });

    let group_status = match best {
        Some(c) if c.offering.is_unlock() => SubscriptionGroupStatus::Subscribed,
        Some(c) => SubscriptionGroupStatus::from_lifecycle(c.fact.state),
        None => status_without_winner(statuses, catalog, unlock_owned),
    };

    exclusions.sort_by(|a, b| {
        (&a.transaction_id, &a.offering_id, a.reason).cmp(&(&b.transaction_id, &b.offering_id, b.reason))
    });

    EntitlementDecision {
        winner: best.map(|c| c.offering.clone()),
        winning_fact: best.map(|c| c.fact.clone()),
        group_status,
        unlock_owned,
        exclusions,
    }
}

/// Group status when nothing survived: owned unlocks count as subscribed,
/// otherwise the newest verified terminal subscription fact decides.
fn status_without_winner(
    statuses: &[PurchaseFact],
    catalog: &[Offering],
    unlock_owned: bool,
) -> SubscriptionGroupStatus {
    if unlock_owned {
        return SubscriptionGroupStatus::Subscribed;
    }

    statuses
        .iter()
        .filter(|fact| fact.is_verified() && fact.state.is_terminal())
        .filter(|fact| matches!(resolve(fact, catalog), Some((_, o)) if o.is_subscription()))
        .max_by_key(|fact| (fact.observed_at, fact.transaction_id.as_str()))
        .map(|fact| SubscriptionGroupStatus::from_lifecycle(fact.state))
        .unwrap_or(SubscriptionGroupStatus::None)
}
