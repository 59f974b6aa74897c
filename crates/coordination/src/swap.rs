//! Swap intents: verify, apply, cancel
//!
//! `verify_and_swap` confirms card possession and writes a swap intent plus a
//! claim key per outgoing card, all under one CAS. The claims are what make
//! the intent a real reservation: a second transaction naming any claimed
//! card sees the claim and reports the card missing, so the same card can
//! never ride two in-flight trades.

use crate::service::{CoordinationService, contains_all};
use crate::{CoordinationError, Result, SwapOutcome, keys};
use triad_common::{PlayerId, TradeCardsPayload, TxId};
use triad_store::{StoreError, Value};

impl CoordinationService {
    /// Verify both inventories and record a swap intent for `tx_id`.
    /// Does not mutate inventories. Idempotent per transaction.
    pub async fn verify_and_swap(
        &self,
        tx_id: &TxId,
        payload: &TradeCardsPayload,
    ) -> Result<SwapOutcome> {
        let intent_key = keys::swap_intent(tx_id);
        let record_key = keys::tx_record(tx_id);
        'attempts: for attempt in 0..self.cas_retries {
            let mut txn = self.store.txn();
            if txn.watch_get(&intent_key).await?.is_some() {
                return Ok(SwapOutcome::Prepared);
            }
            if txn.watch_get(&keys::swap_applied(tx_id)).await?.is_some() {
                return Ok(SwapOutcome::Prepared);
            }
            // A late PREPARE must not place an intent for a decided
            // transaction; the cancel may already have run, and claims
            // created now would bind the cards forever.
            if let Some(value) = txn.watch_get(&record_key).await? {
                let record: triad_common::TransactionRecord =
                    self.decode(&record_key, &value)?;
                if record.status.is_decided() {
                    return Ok(SwapOutcome::Conflict);
                }
            }

            for (player, cards_out) in [
                (&payload.player_a, &payload.cards_a_out),
                (&payload.player_b, &payload.cards_b_out),
            ] {
                let inventory_key = keys::inventory(player);
                let held = match txn.watch_get(&inventory_key).await? {
                    Some(Value::List(items)) => items,
                    Some(_) => return Err(CoordinationError::Corrupt(inventory_key)),
                    None => Vec::new(),
                };
                if !contains_all(&held, cards_out) {
                    return Ok(SwapOutcome::MissingCards);
                }
                for card in cards_out {
                    let claim_key = keys::card_claim(player, card.as_str());
                    if txn.watch_get(&claim_key).await?.is_some() {
                        // Bound to another live intent.
                        return Ok(SwapOutcome::MissingCards);
                    }
                    txn.put(&claim_key, tx_id.to_string());
                }
            }

            txn.put(&intent_key, self.encode(&intent_key, payload)?);
            match txn.exec().await {
                Ok(()) => return Ok(SwapOutcome::Prepared),
                Err(StoreError::WatchConflict(key)) => {
                    tracing::debug!(%tx_id, %key, attempt, "verify_and_swap lost CAS race, retrying");
                    self.retry_backoff(attempt).await;
                    continue 'attempts;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(SwapOutcome::Conflict)
    }

    /// Execute the swap recorded for `tx_id` and drop the intent and claims.
    /// Idempotent via the applied marker.
    pub async fn apply_swap(&self, tx_id: &TxId) -> Result<()> {
        let intent_key = keys::swap_intent(tx_id);
        let marker_key = keys::swap_applied(tx_id);
        for attempt in 0..self.cas_retries {
            let mut txn = self.store.txn();
            let payload: TradeCardsPayload = match txn.watch_get(&intent_key).await? {
                Some(value) => self.decode(&intent_key, &value)?,
                None => {
                    return if txn.watch_get(&marker_key).await?.is_some() {
                        Ok(())
                    } else {
                        // Neither intent nor marker: the decide raced ahead
                        // of the intent row settling. Callers retry.
                        Err(CoordinationError::Conflict(intent_key))
                    };
                }
            };

            // Watch both inventories so the move is serialized against any
            // concurrent materialization into the same players.
            txn.watch_get(&keys::inventory(&payload.player_a)).await?;
            txn.watch_get(&keys::inventory(&payload.player_b)).await?;

            move_cards(&mut txn, &payload.player_a, &payload.player_b, &payload.cards_a_out);
            move_cards(&mut txn, &payload.player_b, &payload.player_a, &payload.cards_b_out);
            clear_claims(&mut txn, &payload);
            txn.delete(&intent_key);
            txn.put(&marker_key, 1i64);

            match txn.exec().await {
                Ok(()) => return Ok(()),
                Err(StoreError::WatchConflict(key)) => {
                    tracing::debug!(%tx_id, %key, attempt, "apply_swap lost CAS race, retrying");
                    self.retry_backoff(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoordinationError::Conflict(intent_key))
    }

    /// Drop the swap intent and claims without touching inventories.
    /// Idempotent: no intent, no-op.
    pub async fn cancel_swap(&self, tx_id: &TxId) -> Result<()> {
        let intent_key = keys::swap_intent(tx_id);
        for attempt in 0..self.cas_retries {
            let mut txn = self.store.txn();
            let payload: TradeCardsPayload = match txn.watch_get(&intent_key).await? {
                Some(value) => self.decode(&intent_key, &value)?,
                None => return Ok(()),
            };
            clear_claims(&mut txn, &payload);
            txn.delete(&intent_key);
            match txn.exec().await {
                Ok(()) => return Ok(()),
                Err(StoreError::WatchConflict(key)) => {
                    tracing::debug!(%tx_id, %key, attempt, "cancel_swap lost CAS race, retrying");
                    self.retry_backoff(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoordinationError::Conflict(intent_key))
    }
}

fn move_cards(
    txn: &mut triad_store::OptimisticTxn,
    from: &PlayerId,
    to: &PlayerId,
    cards: &[triad_common::CardId],
) {
    for card in cards {
        txn.list_remove(keys::inventory(from), card.as_str());
    }
    txn.list_append(
        keys::inventory(to),
        cards.iter().map(|c| c.as_str().to_string()).collect(),
    );
}

fn clear_claims(txn: &mut triad_store::OptimisticTxn, payload: &TradeCardsPayload) {
    for (player, cards) in [
        (&payload.player_a, &payload.cards_a_out),
        (&payload.player_b, &payload.cards_b_out),
    ] {
        for card in cards {
            txn.delete(keys::card_claim(player, card.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use triad_common::CardId;
    use triad_store::{MockStore, StoreClient};

    fn tx(n: u64) -> TxId {
        TxId::new(n, 0, "sul".into())
    }

    fn trade(a: &str, cards_a: &[&str], b: &str, cards_b: &[&str]) -> TradeCardsPayload {
        TradeCardsPayload {
            player_a: PlayerId::new(a),
            cards_a_out: cards_a.iter().map(|c| CardId::new(*c)).collect(),
            player_b: PlayerId::new(b),
            cards_b_out: cards_b.iter().map(|c| CardId::new(*c)).collect(),
        }
    }

    async fn service_with_inventories() -> CoordinationService {
        let store = Arc::new(MockStore::new());
        let svc = CoordinationService::new(StoreClient::new(store));
        // Seed inventories through the reservation path the engine uses.
        svc.bootstrap_stock(10).await.unwrap();
        for (n, player, cards) in [(1u64, "alice", ["a1", "a2"]), (2, "bruno", ["b1", "b2"])] {
            let id = tx(100 + n);
            svc.reserve_pack(
                &id,
                &triad_common::OpenPackPayload {
                    player_id: PlayerId::new(player),
                    pack_template_id: "seed".to_string(),
                },
            )
            .await
            .unwrap();
            svc.materialize_pack(
                &id,
                &PlayerId::new(player),
                &cards.iter().map(|c| CardId::new(*c)).collect::<Vec<_>>(),
            )
            .await
            .unwrap();
        }
        svc
    }

    #[tokio::test]
    async fn swap_commit_moves_cards_both_ways() {
        let svc = service_with_inventories().await;
        let id = tx(1);
        let payload = trade("alice", &["a1"], "bruno", &["b2"]);

        assert_eq!(
            svc.verify_and_swap(&id, &payload).await.unwrap(),
            SwapOutcome::Prepared
        );
        svc.apply_swap(&id).await.unwrap();
        // Duplicate application is a no-op.
        svc.apply_swap(&id).await.unwrap();

        let alice = svc.inventory(&PlayerId::new("alice")).await.unwrap();
        let bruno = svc.inventory(&PlayerId::new("bruno")).await.unwrap();
        assert_eq!(alice, vec![CardId::new("a2"), CardId::new("b2")]);
        assert_eq!(bruno, vec![CardId::new("b1"), CardId::new("a1")]);
    }

    #[tokio::test]
    async fn missing_card_fails_verification() {
        let svc = service_with_inventories().await;
        let payload = trade("alice", &["a9"], "bruno", &["b1"]);
        assert_eq!(
            svc.verify_and_swap(&tx(1), &payload).await.unwrap(),
            SwapOutcome::MissingCards
        );
    }

    #[tokio::test]
    async fn claimed_card_is_reported_missing() {
        let svc = service_with_inventories().await;
        let first = trade("alice", &["a1"], "bruno", &["b1"]);
        let second = trade("alice", &["a1"], "bruno", &["b2"]);

        assert_eq!(
            svc.verify_and_swap(&tx(1), &first).await.unwrap(),
            SwapOutcome::Prepared
        );
        assert_eq!(
            svc.verify_and_swap(&tx(2), &second).await.unwrap(),
            SwapOutcome::MissingCards
        );

        // Cancelling the first intent frees the claim.
        svc.cancel_swap(&tx(1)).await.unwrap();
        assert_eq!(
            svc.verify_and_swap(&tx(2), &second).await.unwrap(),
            SwapOutcome::Prepared
        );
    }

    #[tokio::test]
    async fn cancel_leaves_inventories_untouched() {
        let svc = service_with_inventories().await;
        let payload = trade("alice", &["a1"], "bruno", &["b1"]);
        svc.verify_and_swap(&tx(1), &payload).await.unwrap();
        svc.cancel_swap(&tx(1)).await.unwrap();
        svc.cancel_swap(&tx(1)).await.unwrap();

        assert_eq!(
            svc.inventory(&PlayerId::new("alice")).await.unwrap(),
            vec![CardId::new("a1"), CardId::new("a2")]
        );
        assert_eq!(
            svc.inventory(&PlayerId::new("bruno")).await.unwrap(),
            vec![CardId::new("b1"), CardId::new("b2")]
        );
    }
}
