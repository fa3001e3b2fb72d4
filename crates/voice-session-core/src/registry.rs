//! Incoming call registry
//!
//! Keyed collection of inbound offers that have not been answered or
//! rejected yet. Iteration follows arrival order, so "the first pending
//! offer" is always the oldest one. Offer ids are single-use: once removed,
//! an id is retired and cannot be added again. The retired set keeps the
//! most recent [`RETIRED_CAPACITY`] ids; older ones are forgotten so a
//! long-lived session does not grow without bound.

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::types::{OfferId, PendingCallOffer};

/// Result of trying to add an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The id is already pending
    Duplicate,
    /// The id was removed earlier and is retired
    Retired,
}

/// Retired ids remembered per registry
pub const RETIRED_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct IncomingCallRegistry {
    pending: IndexMap<OfferId, PendingCallOffer>,
    /// Oldest retirement first
    retired: IndexSet<OfferId>,
    retired_capacity: usize,
}

impl Default for IncomingCallRegistry {
    fn default() -> Self {
        Self::with_retired_capacity(RETIRED_CAPACITY)
    }
}

impl IncomingCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retired_capacity(capacity: usize) -> Self {
        IncomingCallRegistry {
            pending: IndexMap::new(),
            retired: IndexSet::new(),
            retired_capacity: capacity.max(1),
        }
    }

    /// Register a new inbound offer
    pub fn add(&mut self, offer: PendingCallOffer) -> AddOutcome {
        if self.retired.contains(&offer.id) {
            debug!(offer_id = %offer.id, "Ignoring retired offer id");
            return AddOutcome::Retired;
        }
        if self.pending.contains_key(&offer.id) {
            return AddOutcome::Duplicate;
        }
        self.pending.insert(offer.id.clone(), offer);
        AddOutcome::Added
    }

    /// Remove a pending offer and retire its id
    pub fn remove(&mut self, offer_id: &OfferId) -> Option<PendingCallOffer> {
        // shift_remove keeps the arrival order of the remaining offers
        let removed = self.pending.shift_remove(offer_id);
        if removed.is_some() {
            self.retire(offer_id.clone());
        }
        removed
    }

    pub fn has(&self, offer_id: &OfferId) -> bool {
        self.pending.contains_key(offer_id)
    }

    pub fn get(&self, offer_id: &OfferId) -> Option<&PendingCallOffer> {
        self.pending.get(offer_id)
    }

    /// Pending offers in arrival order
    pub fn list_active(&self) -> Vec<PendingCallOffer> {
        self.pending.values().cloned().collect()
    }

    /// Oldest pending offer
    pub fn first(&self) -> Option<&PendingCallOffer> {
        self.pending.first().map(|(_, offer)| offer)
    }

    pub fn is_retired(&self, offer_id: &OfferId) -> bool {
        self.retired.contains(offer_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending offer, retiring all ids
    pub fn clear(&mut self) -> Vec<PendingCallOffer> {
        let drained: Vec<PendingCallOffer> = self.pending.drain(..).map(|(_, offer)| offer).collect();
        for offer in &drained {
            self.retire(offer.id.clone());
        }
        drained
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    fn retire(&mut self, offer_id: OfferId) {
        self.retired.insert(offer_id);
        while self.retired.len() > self.retired_capacity {
            if let Some(forgotten) = self.retired.shift_remove_index(0) {
                debug!(offer_id = %forgotten, "Forgetting oldest retired offer id");
            }
        }
    }
}
