//! The loop's view of every purchase fact it currently knows about.
//!
//! - Verified facts are kept per offering; only a newer fact replaces one.
//! - Terminal facts stay as tombstones, so a late `active` fact with an
//!   older timestamp cannot bring an expired subscription back. They are
//!   still handed to the evaluator, which never lets them win but reads
//!   the group status from them.
//! - Unverifiable facts never displace verified ones. They are kept by
//!   transaction id for diagnostics only, keeping the newest up to
//!   [`MAX_UNTRUSTED`].
//! - The set is authoritative only after a status query has filled it and
//!   while every offering that query reported is backed by a verified fact.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::models::PurchaseFact;

/// Unverifiable facts kept for diagnostics. Older ones are dropped first.
pub const MAX_UNTRUSTED: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    verified: BTreeMap<String, PurchaseFact>,
    untrusted: BTreeMap<String, PurchaseFact>,
    /// Offerings the last status query reported only through facts that
    /// failed verification.
    unresolved: BTreeSet<String>,
    seeded: bool,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one fact in. Returns false when the fact was older than what
    /// is already known and therefore ignored.
    pub fn absorb(&mut self, fact: PurchaseFact) -> bool {
        if !fact.is_verified() {
            self.untrusted.insert(fact.transaction_id.clone(), fact);
            self.evict_untrusted();
            return true;
        }

        self.untrusted.remove(&fact.transaction_id);
        self.unresolved.remove(&fact.offering_id);
        match self.verified.get(&fact.offering_id) {
            Some(existing) if !fact.supersedes(existing) => {
                debug!(
                    "Ignoring stale fact {} for '{}' (have {})",
                    fact.transaction_id, fact.offering_id, existing.transaction_id
                );
                false
            }
            _ => {
                self.verified.insert(fact.offering_id.clone(), fact);
                true
            }
        }
    }

    /// Rebuilds the set from an authoritative status query.
    ///
    /// A status that failed verification does not erase the verified fact
    /// previously held for the same offering, unless the query also returned
    /// a verified fact for it. Without either, the offering stays
    /// unresolved until a verified fact for it arrives.
    pub fn replace(&mut self, facts: Vec<PurchaseFact>) {
        let previous = std::mem::take(&mut self.verified);
        self.untrusted.clear();
        self.unresolved.clear();
        self.seeded = true;

        let (verified, untrusted): (Vec<_>, Vec<_>) =
            facts.into_iter().partition(PurchaseFact::is_verified);

        for fact in verified {
            self.absorb(fact);
        }
        for fact in untrusted {
            if !self.verified.contains_key(&fact.offering_id) {
                if let Some(kept) = previous.get(&fact.offering_id) {
                    warn!(
                        "Status for '{}' failed verification, keeping verified fact {}",
                        fact.offering_id, kept.transaction_id
                    );
                    self.verified.insert(fact.offering_id.clone(), kept.clone());
                } else {
                    warn!(
                        "Status for '{}' failed verification and nothing verified backs it",
                        fact.offering_id
                    );
                    self.unresolved.insert(fact.offering_id.clone());
                }
            }
            self.absorb(fact);
        }
    }

    /// Whether a status query has ever filled the set.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Whether a decision drawn from this set may take premium away.
    pub fn is_authoritative(&self) -> bool {
        self.seeded && self.unresolved.is_empty()
    }

    fn evict_untrusted(&mut self) {
        while self.untrusted.len() > MAX_UNTRUSTED {
            let oldest = self
                .untrusted
                .values()
                .min_by_key(|f| (f.observed_at, f.transaction_id.clone()))
                .map(|f| f.transaction_id.clone());
            match oldest {
                Some(transaction_id) => {
                    debug!("Dropping unverifiable fact {} from diagnostics", transaction_id);
                    self.untrusted.remove(&transaction_id);
                }
                None => break,
            }
        }
    }

    /// The latest verified fact per offering plus every unverifiable fact.
    pub fn evaluation_input(&self) -> Vec<PurchaseFact> {
        self.verified
            .values()
            .chain(self.untrusted.values())
            .cloned()
            .collect()
    }

    pub fn verified_len(&self) -> usize {
        self.verified.len()
    }

    pub fn untrusted_len(&self) -> usize {
        self.untrusted.len()
    }
}
