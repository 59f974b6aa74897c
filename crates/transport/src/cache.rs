//! Duplicate-request idempotence cache
//!
//! Calls are idempotent by `(tx_id, phase)`: once a phase has been answered
//! for a transaction, a duplicate delivery returns the cached response
//! without re-running the handler.

use crate::{PeerResponse, Phase};
use dashmap::DashMap;
use triad_common::TxId;

#[derive(Default)]
pub struct ResponseCache {
    answered: DashMap<(TxId, Phase), PeerResponse>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tx_id: &TxId, phase: Phase) -> Option<PeerResponse> {
        self.answered
            .get(&(tx_id.clone(), phase))
            .map(|entry| entry.value().clone())
    }

    pub fn put(&self, tx_id: &TxId, phase: Phase, response: PeerResponse) {
        self.answered.insert((tx_id.clone(), phase), response);
    }

    /// Drop every cached phase for a transaction (after retention purge).
    pub fn forget(&self, tx_id: &TxId) {
        for phase in [Phase::Prepare, Phase::Decide, Phase::Status] {
            self.answered.remove(&(tx_id.clone(), phase));
        }
    }

    /// Distinct transaction ids with at least one cached response. Used by
    /// the retention sweep to find entries whose record is gone.
    pub fn tx_ids(&self) -> Vec<TxId> {
        let mut ids: Vec<TxId> = self
            .answered
            .iter()
            .map(|entry| entry.key().0.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
