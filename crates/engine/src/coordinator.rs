//! Coordinator side of the 2PC protocol
//!
//! The peer that receives the originating client request drives the
//! transaction: write the record, collect votes, record the decision, and
//! deliver it. Self-participation goes through the in-process participant
//! path and is recorded via the same log updates as everyone else's.

use crate::driver::TxDriver;
use crate::{EngineError, Result, pack};
use triad_common::{
    AbortReason, Card, Decision, OpenPackPayload, PlayerId, TradeCardsPayload, TransactionRecord,
    TxClock, TxId, TxPayload,
};

/// What the initiating client sees: at most COMMITTED or ABORTED(reason).
#[derive(Debug, Clone)]
pub enum TxOutcome {
    Committed {
        tx_id: TxId,
        /// Cards materialized by an OPEN_PACK commit; `None` for trades.
        opened: Option<Vec<Card>>,
    },
    Aborted {
        tx_id: TxId,
        reason: AbortReason,
    },
}

impl TxOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed { .. })
    }

    pub fn tx_id(&self) -> &TxId {
        match self {
            TxOutcome::Committed { tx_id, .. } | TxOutcome::Aborted { tx_id, .. } => tx_id,
        }
    }
}

pub struct TxCoordinator {
    driver: TxDriver,
    clock: TxClock,
}

impl TxCoordinator {
    pub(crate) fn new(driver: TxDriver, clock: TxClock) -> Self {
        Self { driver, clock }
    }

    /// Open one pack for a player.
    pub async fn open_pack(
        &self,
        player_id: PlayerId,
        pack_template_id: impl Into<String>,
    ) -> Result<TxOutcome> {
        let pack_template_id = pack_template_id.into();
        if pack_template_id.is_empty() {
            return Err(EngineError::InvalidRequest(
                "pack template id must not be empty".to_string(),
            ));
        }
        self.run(TxPayload::OpenPack(OpenPackPayload {
            player_id,
            pack_template_id,
        }))
        .await
    }

    /// Swap cards between two players.
    pub async fn trade_cards(&self, payload: TradeCardsPayload) -> Result<TxOutcome> {
        if payload.player_a == payload.player_b {
            return Err(EngineError::InvalidRequest(
                "a player cannot trade with itself".to_string(),
            ));
        }
        if payload.cards_a_out.is_empty() && payload.cards_b_out.is_empty() {
            return Err(EngineError::InvalidRequest(
                "a trade must move at least one card".to_string(),
            ));
        }
        self.run(TxPayload::TradeCards(payload)).await
    }

    /// Cancel a transaction this peer coordinates. Only possible while it is
    /// still PREPARING; a decided transaction keeps its decision, which is
    /// returned either way.
    pub async fn cancel(&self, tx_id: &TxId) -> Result<Decision> {
        let record = self
            .driver
            .decide(tx_id, Decision::Abort, Some(AbortReason::Cancelled))
            .await?;
        self.driver.deliver_decision(&record, false).await?;
        record
            .decision
            .ok_or_else(|| EngineError::UnknownTransaction(tx_id.clone()))
    }

    async fn run(&self, payload: TxPayload) -> Result<TxOutcome> {
        let tx_id = self.clock.next();
        let record = TransactionRecord::new(
            tx_id.clone(),
            self.driver.registry.self_id().clone(),
            self.driver.registry.participants(),
            payload,
        );
        // The record must be durable before any peer is contacted.
        self.driver.coordination.log_tx(&record).await?;
        tracing::info!(%tx_id, kind = %record.kind, "transaction started");

        let (decision, reason) = self.driver.prepare_round(&record).await;
        let record = self.driver.decide(&tx_id, decision, reason).await?;

        if !self.driver.deliver_decision(&record, false).await? {
            tracing::warn!(%tx_id, "decision delivery incomplete, recovery will finish it");
        }

        match record.decision {
            Some(Decision::Commit) => {
                tracing::info!(%tx_id, "transaction committed");
                let opened = match &record.payload {
                    TxPayload::OpenPack(open) => Some(pack::open_pack(
                        &open.pack_template_id,
                        &tx_id,
                        self.driver.config.pack_size,
                    )),
                    TxPayload::TradeCards(_) => None,
                };
                Ok(TxOutcome::Committed { tx_id, opened })
            }
            _ => {
                let reason = record.abort_reason.unwrap_or(AbortReason::Conflict);
                tracing::info!(%tx_id, %reason, "transaction aborted");
                Ok(TxOutcome::Aborted { tx_id, reason })
            }
        }
    }
}
