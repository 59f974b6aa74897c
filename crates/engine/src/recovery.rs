//! Recovery sweeper
//!
//! A background task on every peer scans the transaction log for non-terminal
//! records that have stopped making progress and finishes them:
//!
//! - PREPARING past the recovery age: the coordinator is presumed dead. Any
//!   peer may adopt the record by CAS and resume from the PREPARE round;
//!   participants answer from their persisted votes.
//! - GLOBAL_COMMIT / GLOBAL_ABORT: the decision is durable; re-deliver it to
//!   the participants whose acks are missing.
//! - PREPARING past the blocking window: the lowest reachable peer may force
//!   GLOBAL_ABORT, but only after STATUS-polling every participant proves no
//!   one applied a commit. This is the blocking window intrinsic to 2PC.

use crate::driver::TxDriver;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use triad_common::{AbortReason, Decision, TransactionRecord, TxStatus, TxStatusView};
use triad_transport::{PeerResponse, RequestBody};

pub struct RecoverySweeper {
    driver: TxDriver,
}

impl RecoverySweeper {
    pub(crate) fn new(driver: TxDriver) -> Arc<Self> {
        Arc::new(Self { driver })
    }

    pub(crate) fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.driver.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = sweeper.sweep_once().await {
                            tracing::debug!(%err, "sweep pass failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// One full scan of the non-terminal index plus the retention purge.
    pub async fn sweep_once(&self) -> crate::Result<()> {
        for tx_id in self.driver.coordination.scan_nonterminal().await? {
            let Some(record) = self.driver.coordination.load_tx(&tx_id).await? else {
                continue;
            };
            if record.updated_at.age() < self.driver.config.recovery_age {
                continue;
            }
            match record.status {
                TxStatus::Preparing => self.recover_preparing(record).await,
                TxStatus::GlobalCommit | TxStatus::GlobalAbort => self.redeliver(record).await,
                TxStatus::Completed => {}
            }
        }

        let purged = self
            .driver
            .coordination
            .purge_completed(self.driver.config.retention)
            .await?;
        if purged > 0 {
            tracing::debug!(purged, "purged completed transaction records");
        }

        // Drop transport-layer response caches for transactions whose record
        // is gone, whether this pass purged it or another peer's did.
        for tx_id in self.driver.participant.cached_tx_ids() {
            if self.driver.coordination.load_tx(&tx_id).await?.is_none() {
                self.driver.participant.forget_tx(&tx_id);
            }
        }
        Ok(())
    }

    async fn recover_preparing(&self, record: TransactionRecord) {
        if record.updated_at.age() >= self.driver.config.block_max {
            self.force_resolution(record).await;
            return;
        }

        let self_id = self.driver.registry.self_id().clone();
        match self.driver.coordination.adopt_tx(&record.tx_id, &self_id).await {
            Ok(true) => {}
            // Another actor adopted or decided first.
            Ok(false) => return,
            Err(err) => {
                tracing::debug!(tx_id = %record.tx_id, %err, "adoption failed");
                return;
            }
        }
        tracing::info!(tx_id = %record.tx_id, "adopted stalled transaction, re-driving");

        let record = match self.driver.coordination.load_tx(&record.tx_id).await {
            Ok(Some(record)) => record,
            _ => return,
        };
        let (decision, reason) = self.driver.prepare_round(&record).await;
        match self.driver.decide(&record.tx_id, decision, reason).await {
            Ok(decided) => {
                let _ = self.driver.deliver_decision(&decided, true).await;
            }
            Err(err) => {
                tracing::warn!(tx_id = %record.tx_id, %err, "recovery decision failed");
            }
        }
    }

    async fn redeliver(&self, record: TransactionRecord) {
        tracing::info!(
            tx_id = %record.tx_id, decision = ?record.decision,
            "re-delivering stalled decision"
        );
        if let Err(err) = self.driver.deliver_decision(&record, true).await {
            tracing::warn!(tx_id = %record.tx_id, %err, "re-delivery failed");
        }
    }

    /// Blocking-window fallback. Requires proof that no participant applied
    /// a commit, which in turn requires every participant to be reachable.
    async fn force_resolution(&self, record: TransactionRecord) {
        let self_id = self.driver.registry.self_id().clone();
        let mut reachable = vec![self_id.clone()];
        let mut commit_seen = false;

        for peer in record.participants.iter().filter(|p| **p != self_id) {
            let response = self
                .driver
                .send(
                    peer,
                    record.tx_id.clone(),
                    RequestBody::Status,
                    self.driver.config.prepare_timeout,
                )
                .await;
            match response {
                Ok(PeerResponse::Status {
                    status, decision, ..
                }) => {
                    reachable.push(peer.clone());
                    if decision == Some(Decision::Commit)
                        || matches!(status, TxStatusView::GlobalCommit)
                    {
                        commit_seen = true;
                    }
                }
                Ok(_) => reachable.push(peer.clone()),
                Err(err) => {
                    tracing::debug!(
                        tx_id = %record.tx_id, %peer, %err,
                        "participant dark, deferring forced resolution"
                    );
                    return;
                }
            }
        }

        // Quorum election: lowest reachable peer id acts.
        if reachable.iter().min() != Some(&self_id) {
            return;
        }

        let (decision, reason) = if commit_seen {
            (Decision::Commit, None)
        } else {
            tracing::warn!(tx_id = %record.tx_id, "forcing abort after blocking window");
            (Decision::Abort, Some(AbortReason::Expired))
        };
        match self.driver.decide(&record.tx_id, decision, reason).await {
            Ok(decided) => {
                let _ = self.driver.deliver_decision(&decided, true).await;
            }
            Err(err) => {
                tracing::warn!(tx_id = %record.tx_id, %err, "forced resolution failed");
            }
        }
    }
}
