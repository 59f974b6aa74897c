//! Transaction log: durable records plus the recovery index
//!
//! The log entry is the authoritative status of every transaction. Each
//! update here is a CAS on the serialized record that enforces the monotonic
//! state machine; a non-terminal index set gives the recovery sweeper a cheap
//! scan, and a completed index drives the retention purge.

use crate::service::CoordinationService;
use crate::{CoordinationError, Result, keys};
use std::time::Duration;
use triad_common::{
    AbortReason, Decision, PeerId, Timestamp, TransactionRecord, TxId, TxStatus, Vote,
};
use triad_store::StoreError;

impl CoordinationService {
    /// Create the durable record for a new transaction. Fails if a record for
    /// the id already exists; the coordinator must not contact any peer until
    /// this has succeeded.
    pub async fn log_tx(&self, record: &TransactionRecord) -> Result<()> {
        let key = keys::tx_record(&record.tx_id);
        let mut txn = self.store.txn();
        if txn.watch_get(&key).await?.is_some() {
            return Err(CoordinationError::ProtocolViolation(format!(
                "transaction {} already logged",
                record.tx_id
            )));
        }
        txn.put(&key, self.encode(&key, record)?);
        txn.set_add(keys::NONTERMINAL_INDEX, record.tx_id.to_string());
        match txn.exec().await {
            Ok(()) => Ok(()),
            Err(StoreError::WatchConflict(_)) => Err(CoordinationError::ProtocolViolation(
                format!("transaction {} already logged", record.tx_id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load_tx(&self, tx_id: &TxId) -> Result<Option<TransactionRecord>> {
        let key = keys::tx_record(tx_id);
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(self.decode(&key, &value)?)),
            None => Ok(None),
        }
    }

    /// Persist a participant's vote. The write lands before the vote is ever
    /// returned to a coordinator; that ordering is the participant's promise.
    ///
    /// Returns the updated record. If the transaction is already decided the
    /// vote is not inserted and the decided record comes back unchanged. A
    /// repeated identical vote is a no-op; a contradicting re-vote keeps the
    /// first and is logged.
    pub async fn record_vote(
        &self,
        tx_id: &TxId,
        peer: &PeerId,
        vote: Vote,
    ) -> Result<TransactionRecord> {
        self.update_record(tx_id, move |record| {
            if record.status.is_decided() {
                return RecordUpdate::Unchanged;
            }
            match record.votes.get(peer) {
                Some(existing) if *existing == vote => RecordUpdate::Unchanged,
                Some(existing) => {
                    tracing::warn!(
                        %tx_id, %peer, ?existing, ?vote,
                        "contradicting re-vote ignored"
                    );
                    RecordUpdate::Unchanged
                }
                None => {
                    record.votes.insert(peer.clone(), vote);
                    RecordUpdate::Changed
                }
            }
        })
        .await
    }

    /// Record the global decision: CAS from PREPARING to GLOBAL_COMMIT or
    /// GLOBAL_ABORT. Recording the same decision twice is idempotent; a
    /// contradicting decision is a protocol violation and never touches the
    /// stored record.
    pub async fn decide_tx(
        &self,
        tx_id: &TxId,
        decision: Decision,
        abort_reason: Option<AbortReason>,
    ) -> Result<TransactionRecord> {
        self.update_record(tx_id, move |record| {
            if record.status.is_decided() {
                return if record.decision == Some(decision) {
                    RecordUpdate::Unchanged
                } else {
                    RecordUpdate::Violation(format!(
                        "transaction {tx_id} already decided {:?}, refusing {decision}",
                        record.decision
                    ))
                };
            }
            let next = match decision {
                Decision::Commit => TxStatus::GlobalCommit,
                Decision::Abort => TxStatus::GlobalAbort,
            };
            debug_assert!(record.status.can_advance_to(next));
            record.status = next;
            record.decision = Some(decision);
            if decision == Decision::Abort {
                record.abort_reason = abort_reason;
            }
            RecordUpdate::Changed
        })
        .await
    }

    /// Record that `peer` has durably applied the decision.
    pub async fn record_ack(&self, tx_id: &TxId, peer: &PeerId) -> Result<TransactionRecord> {
        self.update_record(tx_id, move |record| {
            if !record.status.is_decided() {
                return RecordUpdate::Violation(format!(
                    "ack from {peer} for undecided transaction {tx_id}"
                ));
            }
            if record.acks.insert(peer.clone()) {
                RecordUpdate::Changed
            } else {
                RecordUpdate::Unchanged
            }
        })
        .await
    }

    /// CAS from GLOBAL_* to COMPLETED once every ack is in. Idempotent.
    pub async fn complete_tx(&self, tx_id: &TxId) -> Result<TransactionRecord> {
        self.update_record(tx_id, move |record| match record.status {
            TxStatus::Completed => RecordUpdate::Unchanged,
            TxStatus::GlobalCommit | TxStatus::GlobalAbort => {
                record.status = TxStatus::Completed;
                record.completed_at = Some(Timestamp::now());
                RecordUpdate::Changed
            }
            TxStatus::Preparing => {
                RecordUpdate::Violation(format!("completing undecided transaction {tx_id}"))
            }
        })
        .await
    }

    /// Recovery adoption: CAS the coordinator field to `peer`. Single-shot;
    /// returns false if the record moved underneath us or is already decided.
    pub async fn adopt_tx(&self, tx_id: &TxId, peer: &PeerId) -> Result<bool> {
        let key = keys::tx_record(tx_id);
        let mut txn = self.store.txn();
        let mut record: TransactionRecord = match txn.watch_get(&key).await? {
            Some(value) => self.decode(&key, &value)?,
            None => return Ok(false),
        };
        if record.status != TxStatus::Preparing {
            return Ok(false);
        }
        record.coordinator = peer.clone();
        record.updated_at = Timestamp::now();
        txn.put(&key, self.encode(&key, &record)?);
        match txn.exec().await {
            Ok(()) => Ok(true),
            Err(StoreError::WatchConflict(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Transaction ids whose records are not yet COMPLETED.
    pub async fn scan_nonterminal(&self) -> Result<Vec<TxId>> {
        let members = match self.store.get(keys::NONTERMINAL_INDEX).await? {
            Some(value) => value
                .as_set()
                .ok_or_else(|| CoordinationError::Corrupt(keys::NONTERMINAL_INDEX.to_string()))?
                .clone(),
            None => return Ok(Vec::new()),
        };
        let mut ids = Vec::with_capacity(members.len());
        for member in members {
            match TxId::parse(&member) {
                Ok(id) => ids.push(id),
                Err(err) => tracing::warn!(%member, %err, "skipping unparseable index entry"),
            }
        }
        Ok(ids)
    }

    /// Drop COMPLETED records older than the retention window. Returns how
    /// many were purged.
    pub async fn purge_completed(&self, retention: Duration) -> Result<usize> {
        let members = match self.store.get(keys::COMPLETED_INDEX).await? {
            Some(value) => value
                .as_set()
                .ok_or_else(|| CoordinationError::Corrupt(keys::COMPLETED_INDEX.to_string()))?
                .clone(),
            None => return Ok(0),
        };

        let mut purged = 0;
        for member in members {
            let Ok(tx_id) = TxId::parse(&member) else {
                continue;
            };
            let expired = match self.load_tx(&tx_id).await? {
                Some(record) => record
                    .completed_at
                    .is_some_and(|done| done.age() > retention),
                // Record already gone; drop the index entry.
                None => true,
            };
            if expired {
                let mut txn = self.store.txn();
                txn.delete(keys::tx_record(&tx_id));
                txn.delete(keys::materialized(&tx_id));
                txn.delete(keys::swap_applied(&tx_id));
                txn.set_remove(keys::COMPLETED_INDEX, member);
                txn.exec().await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Shared CAS loop over one record.
    async fn update_record<F>(&self, tx_id: &TxId, mut mutate: F) -> Result<TransactionRecord>
    where
        F: FnMut(&mut TransactionRecord) -> RecordUpdate,
    {
        let key = keys::tx_record(tx_id);
        for attempt in 0..self.cas_retries {
            let mut txn = self.store.txn();
            let mut record: TransactionRecord = match txn.watch_get(&key).await? {
                Some(value) => self.decode(&key, &value)?,
                None => return Err(CoordinationError::UnknownTransaction(tx_id.clone())),
            };

            match mutate(&mut record) {
                RecordUpdate::Unchanged => return Ok(record),
                RecordUpdate::Violation(message) => {
                    return Err(CoordinationError::ProtocolViolation(message));
                }
                RecordUpdate::Changed => {}
            }

            record.updated_at = Timestamp::now();
            if record.status == TxStatus::Completed {
                txn.set_remove(keys::NONTERMINAL_INDEX, tx_id.to_string());
                txn.set_add(keys::COMPLETED_INDEX, tx_id.to_string());
            }
            txn.put(&key, self.encode(&key, &record)?);
            match txn.exec().await {
                Ok(()) => return Ok(record),
                Err(StoreError::WatchConflict(_)) => {
                    self.retry_backoff(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoordinationError::Conflict(key))
    }
}

enum RecordUpdate {
    Changed,
    Unchanged,
    Violation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use triad_common::{OpenPackPayload, PlayerId, TxPayload};
    use triad_store::{MockStore, StoreClient};

    fn service() -> CoordinationService {
        CoordinationService::new(StoreClient::new(Arc::new(MockStore::new())))
    }

    fn record(n: u64) -> TransactionRecord {
        TransactionRecord::new(
            TxId::new(n, 0, "norte".into()),
            "norte".into(),
            vec!["norte".into(), "sul".into()],
            TxPayload::OpenPack(OpenPackPayload {
                player_id: PlayerId::new("alice"),
                pack_template_id: "standard".to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn log_tx_is_create_only() {
        let svc = service();
        let r = record(1);
        svc.log_tx(&r).await.unwrap();
        assert!(matches!(
            svc.log_tx(&r).await,
            Err(CoordinationError::ProtocolViolation(_))
        ));
        assert_eq!(svc.load_tx(&r.tx_id).await.unwrap().unwrap().tx_id, r.tx_id);
    }

    #[tokio::test]
    async fn votes_persist_and_first_vote_wins() {
        let svc = service();
        let r = record(1);
        svc.log_tx(&r).await.unwrap();

        let sul = PeerId::new("sul");
        let updated = svc.record_vote(&r.tx_id, &sul, Vote::Commit).await.unwrap();
        assert_eq!(updated.votes.get(&sul), Some(&Vote::Commit));

        let again = svc
            .record_vote(
                &r.tx_id,
                &sul,
                Vote::Abort {
                    reason: AbortReason::OutOfStock,
                },
            )
            .await
            .unwrap();
        assert_eq!(again.votes.get(&sul), Some(&Vote::Commit));
    }

    #[tokio::test]
    async fn contradicting_decisions_are_rejected() {
        let svc = service();
        let r = record(1);
        svc.log_tx(&r).await.unwrap();

        svc.decide_tx(&r.tx_id, Decision::Commit, None).await.unwrap();
        // Idempotent same decision.
        svc.decide_tx(&r.tx_id, Decision::Commit, None).await.unwrap();
        // Contradiction is fatal for the attempting operation.
        assert!(matches!(
            svc.decide_tx(&r.tx_id, Decision::Abort, Some(AbortReason::Conflict))
                .await,
            Err(CoordinationError::ProtocolViolation(_))
        ));
        assert_eq!(
            svc.load_tx(&r.tx_id).await.unwrap().unwrap().status,
            TxStatus::GlobalCommit
        );
    }

    #[tokio::test]
    async fn completion_maintains_the_indexes() {
        let svc = service();
        let r = record(1);
        svc.log_tx(&r).await.unwrap();
        assert_eq!(svc.scan_nonterminal().await.unwrap(), vec![r.tx_id.clone()]);

        svc.decide_tx(&r.tx_id, Decision::Abort, Some(AbortReason::OutOfStock))
            .await
            .unwrap();
        svc.record_ack(&r.tx_id, &"norte".into()).await.unwrap();
        svc.record_ack(&r.tx_id, &"sul".into()).await.unwrap();
        svc.complete_tx(&r.tx_id).await.unwrap();

        assert!(svc.scan_nonterminal().await.unwrap().is_empty());
        // Completed records stay queryable within the retention window.
        let stored = svc.load_tx(&r.tx_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Completed);
        assert_eq!(svc.purge_completed(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(svc.purge_completed(Duration::ZERO).await.unwrap(), 1);
        assert!(svc.load_tx(&r.tx_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_before_decision_is_a_violation() {
        let svc = service();
        let r = record(1);
        svc.log_tx(&r).await.unwrap();
        assert!(matches!(
            svc.record_ack(&r.tx_id, &"sul".into()).await,
            Err(CoordinationError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn adoption_is_single_shot_cas() {
        let svc = service();
        let r = record(1);
        svc.log_tx(&r).await.unwrap();

        assert!(svc.adopt_tx(&r.tx_id, &"sul".into()).await.unwrap());
        assert_eq!(
            svc.load_tx(&r.tx_id).await.unwrap().unwrap().coordinator,
            "sul".into()
        );

        // Decided records cannot be adopted.
        svc.decide_tx(&r.tx_id, Decision::Commit, None).await.unwrap();
        assert!(!svc.adopt_tx(&r.tx_id, &"leste".into()).await.unwrap());
    }
}
