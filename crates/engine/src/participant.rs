//! Participant side of the 2PC protocol
//!
//! Handles PREPARE, DECIDE, and STATUS for every transaction in the system,
//! whether the request came over the wire or from this peer's own
//! coordinator. Duplicate requests are serialized by a per-transaction lock
//! and answered from the response cache; votes are persisted before they are
//! returned, and effects are durable before a DECIDE is acknowledged.

use crate::{EngineConfig, PeerRegistry, pack};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use triad_common::{AbortReason, Decision, TxId, TxPayload, TxStatusView, Vote};
use triad_coordination::{CoordinationError, CoordinationService, ReserveOutcome, SwapOutcome};
use triad_transport::{PeerRequest, PeerResponse, Phase, ResponseCache, RequestBody};

const STORE_RETRY_PAUSE: Duration = Duration::from_millis(50);

pub struct Participant {
    registry: Arc<PeerRegistry>,
    coordination: CoordinationService,
    config: EngineConfig,
    cache: ResponseCache,
    tx_locks: DashMap<TxId, Arc<tokio::sync::Mutex<()>>>,
}

impl Participant {
    pub fn new(
        registry: Arc<PeerRegistry>,
        coordination: CoordinationService,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            coordination,
            config,
            cache: ResponseCache::new(),
            tx_locks: DashMap::new(),
        }
    }

    /// Dispatch one request. Never fails: every internal error is mapped
    /// onto the protocol (an abort vote, or an unacknowledged decide that
    /// recovery will re-deliver).
    pub async fn handle(&self, request: PeerRequest) -> PeerResponse {
        let tx_id = request.tx_id;
        match request.body {
            RequestBody::Prepare { payload, .. } => self.handle_prepare(&tx_id, payload).await,
            RequestBody::Decide { decision } => self.handle_decide(&tx_id, decision).await,
            RequestBody::Status => self.handle_status(&tx_id).await,
        }
    }

    fn tx_lock(&self, tx_id: &TxId) -> Arc<tokio::sync::Mutex<()>> {
        self.tx_locks.entry(tx_id.clone()).or_default().clone()
    }

    /// Transaction ids this peer still holds cached responses for.
    pub(crate) fn cached_tx_ids(&self) -> Vec<TxId> {
        self.cache.tx_ids()
    }

    /// Drop the cached responses and lock for a transaction whose record
    /// left the retention window.
    pub(crate) fn forget_tx(&self, tx_id: &TxId) {
        self.cache.forget(tx_id);
        self.tx_locks.remove(tx_id);
    }

    async fn handle_prepare(&self, tx_id: &TxId, payload: TxPayload) -> PeerResponse {
        let lock = self.tx_lock(tx_id);
        let _guard = lock.lock().await;

        if let Some(cached) = self.cache.get(tx_id, Phase::Prepare) {
            return cached;
        }

        let vote = self.vote(tx_id, &payload).await;
        tracing::debug!(%tx_id, ?vote, peer = %self.registry.self_id(), "prepare answered");
        let response = PeerResponse::Vote { vote };
        self.cache.put(tx_id, Phase::Prepare, response.clone());
        response
    }

    /// Produce and persist this peer's vote. Store outages are retried until
    /// the prepare deadline, then surface as an ABORT vote.
    async fn vote(&self, tx_id: &TxId, payload: &TxPayload) -> Vote {
        let deadline = Instant::now() + self.config.prepare_timeout;
        loop {
            match self.try_vote(tx_id, payload).await {
                Ok(vote) => return vote,
                Err(CoordinationError::StoreUnavailable) if Instant::now() < deadline => {
                    tokio::time::sleep(STORE_RETRY_PAUSE).await;
                }
                Err(CoordinationError::StoreUnavailable) => {
                    return Vote::Abort {
                        reason: AbortReason::StoreUnavailable,
                    };
                }
                Err(err) => {
                    tracing::warn!(%tx_id, %err, "prepare failed");
                    return Vote::Abort {
                        reason: AbortReason::Conflict,
                    };
                }
            }
        }
    }

    async fn try_vote(
        &self,
        tx_id: &TxId,
        payload: &TxPayload,
    ) -> Result<Vote, CoordinationError> {
        let self_id = self.registry.self_id();

        match self.coordination.load_tx(tx_id).await? {
            Some(record) if record.status.is_decided() => {
                // Late duplicate PREPARE; answer consistently with the
                // recorded decision.
                let vote = record.votes.get(self_id).copied().unwrap_or(
                    match record.decision {
                        Some(Decision::Commit) => Vote::Commit,
                        _ => Vote::Abort {
                            reason: record.abort_reason.unwrap_or(AbortReason::Conflict),
                        },
                    },
                );
                return Ok(vote);
            }
            Some(record) => {
                if let Some(vote) = record.votes.get(self_id) {
                    // Recovery re-issued PREPARE; the persisted vote binds.
                    return Ok(*vote);
                }
            }
            None => {
                tracing::warn!(%tx_id, "prepare for unlogged transaction");
                return Ok(Vote::Abort {
                    reason: AbortReason::Conflict,
                });
            }
        }

        let vote = match payload {
            TxPayload::OpenPack(open) => {
                match self.coordination.reserve_pack(tx_id, open).await? {
                    ReserveOutcome::Reserved => Vote::Commit,
                    ReserveOutcome::OutOfStock => Vote::Abort {
                        reason: AbortReason::OutOfStock,
                    },
                    ReserveOutcome::Conflict => Vote::Abort {
                        reason: AbortReason::Conflict,
                    },
                }
            }
            TxPayload::TradeCards(trade) => {
                match self.coordination.verify_and_swap(tx_id, trade).await? {
                    SwapOutcome::Prepared => Vote::Commit,
                    SwapOutcome::MissingCards => Vote::Abort {
                        reason: AbortReason::MissingCards,
                    },
                    SwapOutcome::Conflict => Vote::Abort {
                        reason: AbortReason::Conflict,
                    },
                }
            }
        };

        // The durable vote is the participant's promise; it lands before the
        // coordinator ever sees the answer.
        self.coordination.record_vote(tx_id, self_id, vote).await?;
        Ok(vote)
    }

    async fn handle_decide(&self, tx_id: &TxId, decision: Decision) -> PeerResponse {
        let lock = self.tx_lock(tx_id);
        let _guard = lock.lock().await;

        if let Some(cached) = self.cache.get(tx_id, Phase::Decide) {
            return cached;
        }

        if self.apply_decision(tx_id, decision).await {
            self.cache
                .put(tx_id, Phase::Decide, PeerResponse::DecideAck);
            self.tx_locks.remove(tx_id);
        }
        // An unapplied decision is still acked at the RPC level; completion
        // tracks the durable per-participant acks in the record, and the
        // sweeper re-delivers until those are in.
        PeerResponse::DecideAck
    }

    /// Apply the decision's effect and record this peer's ack. Store outages
    /// and CAS exhaustion are retried indefinitely; the decision is already
    /// durable, so there is nothing else to wait for.
    async fn apply_decision(&self, tx_id: &TxId, decision: Decision) -> bool {
        loop {
            match self.try_apply(tx_id, decision).await {
                Ok(()) => return true,
                Err(CoordinationError::StoreUnavailable | CoordinationError::Conflict(_)) => {
                    tokio::time::sleep(STORE_RETRY_PAUSE).await;
                }
                Err(err) => {
                    // CAS guards keep the stored state intact; leave the rest
                    // to recovery.
                    tracing::error!(%tx_id, %err, "decision application failed");
                    return false;
                }
            }
        }
    }

    async fn try_apply(
        &self,
        tx_id: &TxId,
        decision: Decision,
    ) -> Result<(), CoordinationError> {
        let self_id = self.registry.self_id();
        let record = match self.coordination.load_tx(tx_id).await? {
            Some(record) => record,
            None => {
                // Purged after completion: the effect is already durable.
                tracing::info!(%tx_id, %decision, "decide for unknown transaction, nothing to apply");
                return Ok(());
            }
        };

        let record = if record.status.is_decided() {
            if record.decision != Some(decision) {
                tracing::warn!(
                    %tx_id, stored = ?record.decision, received = %decision,
                    "decide contradicts stored decision; the stored one wins"
                );
            }
            record
        } else {
            // The sender recorded its decision before sending, but this peer
            // sees a stale PREPARING record (late join after restart). Make
            // the decision durable here, then apply it.
            self.coordination.decide_tx(tx_id, decision, None).await?
        };

        let effective = match record.decision {
            Some(d) => d,
            None => decision,
        };
        match (&record.payload, effective) {
            (TxPayload::OpenPack(open), Decision::Commit) => {
                let cards: Vec<_> =
                    pack::open_pack(&open.pack_template_id, tx_id, self.config.pack_size)
                        .into_iter()
                        .map(|card| card.id)
                        .collect();
                self.coordination
                    .materialize_pack(tx_id, &open.player_id, &cards)
                    .await?;
            }
            (TxPayload::OpenPack(_), Decision::Abort) => {
                self.coordination.release_pack(tx_id).await?;
            }
            (TxPayload::TradeCards(_), Decision::Commit) => {
                self.coordination.apply_swap(tx_id).await?;
            }
            (TxPayload::TradeCards(_), Decision::Abort) => {
                self.coordination.cancel_swap(tx_id).await?;
            }
        }

        // Effect durable; acknowledge in the record and complete if we are
        // the last participant in.
        let record = self.coordination.record_ack(tx_id, self_id).await?;
        if record.unacked().is_empty() {
            self.coordination.complete_tx(tx_id).await?;
        }
        Ok(())
    }

    async fn handle_status(&self, tx_id: &TxId) -> PeerResponse {
        let self_id = self.registry.self_id();
        match self.coordination.load_tx(tx_id).await {
            Ok(Some(record)) => PeerResponse::Status {
                status: record.view_for(self_id),
                vote: record.votes.get(self_id).copied(),
                decision: record.decision,
            },
            Ok(None) => PeerResponse::Status {
                status: TxStatusView::Unknown,
                vote: None,
                decision: None,
            },
            Err(err) => {
                tracing::debug!(%tx_id, %err, "status read failed");
                PeerResponse::Status {
                    status: TxStatusView::Unknown,
                    vote: None,
                    decision: None,
                }
            }
        }
    }
}
