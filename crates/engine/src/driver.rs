//! Shared transaction-driving logic
//!
//! Both the coordinator and the recovery sweeper run the same three steps:
//! a PREPARE fan-out, the decision CAS, and DECIDE delivery. Recovery is the
//! coordinator protocol resumed by another peer, so the steps live here once.

use crate::{EngineConfig, EngineError, EventBus, GameEvent, Participant, PeerRegistry};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use triad_common::{AbortReason, Decision, PeerId, TransactionRecord, TxId, Vote};
use triad_coordination::{CoordinationError, CoordinationService};
use triad_transport::{PeerRequest, PeerResponse, PeerTransport, RequestBody, TransportError};

#[derive(Clone)]
pub(crate) struct TxDriver {
    pub(crate) registry: Arc<PeerRegistry>,
    pub(crate) coordination: CoordinationService,
    pub(crate) transport: Arc<PeerTransport>,
    pub(crate) participant: Arc<Participant>,
    pub(crate) config: EngineConfig,
    pub(crate) events: EventBus,
}

impl TxDriver {
    /// Fan out PREPARE and collect votes under the prepare deadline. The
    /// first ABORT vote decides; the remaining in-flight requests are
    /// cancelled (their participants answer anyway and persist their votes,
    /// which recovery can read).
    ///
    /// A vote already persisted in the record binds (a participant that has
    /// VOTED_COMMIT may not be flipped to abort just because it is currently
    /// unreachable), so only participants without one are asked. On the
    /// first round the vote map is empty and everyone is.
    pub(crate) async fn prepare_round(
        &self,
        record: &TransactionRecord,
    ) -> (Decision, Option<AbortReason>) {
        let mut votes = JoinSet::new();
        for peer in record.participants.clone() {
            if let Some(vote) = record.votes.get(&peer) {
                if let Vote::Abort { reason } = vote {
                    return (Decision::Abort, Some(*reason));
                }
                continue;
            }
            let driver = self.clone();
            let tx_id = record.tx_id.clone();
            let body = RequestBody::Prepare {
                kind: record.kind,
                payload: record.payload.clone(),
            };
            votes.spawn(async move { driver.send_prepare(&peer, tx_id, body).await });
        }

        while let Some(joined) = votes.join_next().await {
            let vote = joined.unwrap_or(Vote::Abort {
                reason: AbortReason::PeerUnavailable,
            });
            if let Vote::Abort { reason } = vote {
                return (Decision::Abort, Some(reason));
            }
        }
        (Decision::Commit, None)
    }

    async fn send_prepare(&self, peer: &PeerId, tx_id: TxId, body: RequestBody) -> Vote {
        let response = self
            .send(peer, tx_id, body, self.config.prepare_timeout)
            .await;
        match response {
            Ok(PeerResponse::Vote { vote }) => vote,
            Ok(other) => {
                tracing::warn!(%peer, ?other, "unexpected prepare response");
                Vote::Abort {
                    reason: AbortReason::PeerUnavailable,
                }
            }
            Err(TransportError::Timeout(_)) => Vote::Abort {
                reason: AbortReason::Timeout,
            },
            Err(_) => Vote::Abort {
                reason: AbortReason::PeerUnavailable,
            },
        }
    }

    /// Record the global decision. If another actor (recovery) decided
    /// first, adopt that decision. Publishes the decided event either way.
    pub(crate) async fn decide(
        &self,
        tx_id: &TxId,
        decision: Decision,
        reason: Option<AbortReason>,
    ) -> crate::Result<TransactionRecord> {
        let record = match self.coordination.decide_tx(tx_id, decision, reason).await {
            Ok(record) => record,
            Err(CoordinationError::ProtocolViolation(message)) => {
                tracing::info!(%tx_id, %message, "decision already recorded, adopting it");
                self.coordination
                    .load_tx(tx_id)
                    .await?
                    .ok_or_else(|| EngineError::UnknownTransaction(tx_id.clone()))?
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(decided) = record.decision {
            self.events.publish(GameEvent::TransactionDecided {
                tx_id: tx_id.clone(),
                kind: record.kind,
                decision: decided,
                abort_reason: record.abort_reason,
            });
        }
        Ok(record)
    }

    /// Deliver the decision to every participant whose ack is missing. Each
    /// delivery retries under the decide deadline. Returns whether the
    /// record reached COMPLETED.
    ///
    /// With `surrogate` set (recovery only), participants that stayed
    /// unreachable for the whole round are acknowledged on their behalf —
    /// but only once the decision's effect is provably durable (some
    /// participant's own ack is in). Every effect lives in the shared store
    /// and is applied at most once via its marker, so a dead peer has
    /// nothing left to contribute; if it ever returns, its own late DECIDE
    /// handling is a no-op. Coordinators never surrogate-ack: a first
    /// delivery round that fails is simply left to the sweeper.
    pub(crate) async fn deliver_decision(
        &self,
        record: &TransactionRecord,
        surrogate: bool,
    ) -> crate::Result<bool> {
        let decision = record.decision.ok_or_else(|| {
            EngineError::Coordination(CoordinationError::ProtocolViolation(format!(
                "delivering undecided transaction {}",
                record.tx_id
            )))
        })?;

        let mut deliveries = JoinSet::new();
        for peer in record.unacked() {
            let driver = self.clone();
            let tx_id = record.tx_id.clone();
            deliveries.spawn(async move {
                let delivered = driver.send_decide(&peer, tx_id, decision).await;
                (peer, delivered)
            });
        }
        let mut undelivered = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            if let Ok((peer, false)) = joined {
                undelivered.push(peer);
            }
        }

        let mut refreshed = self
            .coordination
            .load_tx(&record.tx_id)
            .await?
            .ok_or_else(|| EngineError::UnknownTransaction(record.tx_id.clone()))?;
        if refreshed.status.is_terminal() {
            return Ok(true);
        }

        if surrogate && !refreshed.acks.is_empty() {
            for peer in undelivered {
                if refreshed.acks.contains(&peer) {
                    continue;
                }
                tracing::warn!(
                    tx_id = %record.tx_id, %peer,
                    "acknowledging decision on behalf of unreachable participant"
                );
                refreshed = self.coordination.record_ack(&record.tx_id, &peer).await?;
            }
        }

        if refreshed.unacked().is_empty() {
            self.coordination.complete_tx(&record.tx_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn send_decide(&self, peer: &PeerId, tx_id: TxId, decision: Decision) -> bool {
        let deadline = Instant::now() + self.config.decide_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(%peer, %tx_id, "decide delivery deadline passed, leaving to recovery");
                return false;
            }
            let body = RequestBody::Decide { decision };
            match self.send(peer, tx_id.clone(), body, remaining).await {
                Ok(PeerResponse::DecideAck) => return true,
                Ok(other) => {
                    tracing::warn!(%peer, ?other, "unexpected decide response");
                    return false;
                }
                Err(err) => {
                    tracing::debug!(%peer, %tx_id, %err, "decide delivery failed, retrying");
                    tokio::time::sleep(self.config.decide_retry_pause).await;
                }
            }
        }
    }

    /// Route a request: in-process for self, over the transport otherwise.
    pub(crate) async fn send(
        &self,
        peer: &PeerId,
        tx_id: TxId,
        body: RequestBody,
        deadline: std::time::Duration,
    ) -> triad_transport::Result<PeerResponse> {
        if peer == self.registry.self_id() {
            let request = PeerRequest {
                sender: self.registry.self_id().clone(),
                seq: 0,
                tx_id,
                body,
            };
            match tokio::time::timeout(deadline, self.participant.handle(request)).await {
                Ok(response) => Ok(response),
                Err(_) => Err(TransportError::Timeout(peer.clone())),
            }
        } else {
            self.transport.request(peer, tx_id, body, deadline).await
        }
    }
}
