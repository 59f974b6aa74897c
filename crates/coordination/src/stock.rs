//! Pack stock operations: reserve, release, materialize
//!
//! A reservation binds one pack to one transaction id between PREPARE and the
//! terminal decision. The stock decrement and the reservation record move in
//! one atomic exec, so the stock key is the single arbiter between contending
//! transactions.

use crate::service::CoordinationService;
use crate::{CoordinationError, ReserveOutcome, Result, keys};
use triad_common::{CardId, OpenPackPayload, PlayerId, TxId};
use triad_store::StoreError;

impl CoordinationService {
    /// Atomically decrement stock and record a reservation for `tx_id`.
    ///
    /// Idempotent per transaction: a reservation (or materialize marker)
    /// already present for `tx_id` reports `Reserved` without touching stock,
    /// which is what lets every participant of one transaction call this
    /// against the shared store while only one pack is taken.
    pub async fn reserve_pack(
        &self,
        tx_id: &TxId,
        payload: &OpenPackPayload,
    ) -> Result<ReserveOutcome> {
        let reservation_key = keys::reservation(tx_id);
        let record_key = keys::tx_record(tx_id);
        for attempt in 0..self.cas_retries {
            let mut txn = self.store.txn();
            if txn.watch_get(&reservation_key).await?.is_some() {
                return Ok(ReserveOutcome::Reserved);
            }
            if txn.watch_get(&keys::materialized(tx_id)).await?.is_some() {
                return Ok(ReserveOutcome::Reserved);
            }
            // A late PREPARE must not reserve for a transaction that has
            // already been decided (the release may already have run, and a
            // reservation created now would leak a pack). Watching the
            // record makes this check atomic with the decrement.
            if let Some(value) = txn.watch_get(&record_key).await? {
                let record: triad_common::TransactionRecord =
                    self.decode(&record_key, &value)?;
                if record.status.is_decided() {
                    return Ok(ReserveOutcome::Conflict);
                }
            }

            let remaining = txn
                .watch_get(keys::STOCK)
                .await?
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            if remaining <= 0 {
                // The reads above were sequential; an empty exec validates
                // them as one snapshot. Otherwise "no reservation yet" could
                // be stale and this vote would abort a transaction that just
                // obtained its pack.
                match txn.exec().await {
                    Ok(()) => return Ok(ReserveOutcome::OutOfStock),
                    Err(StoreError::WatchConflict(key)) => {
                        tracing::debug!(%tx_id, %key, attempt, "stale out-of-stock read, retrying");
                        self.retry_backoff(attempt).await;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            txn.put(keys::STOCK, remaining - 1);
            txn.put(&reservation_key, self.encode(&reservation_key, payload)?);
            match txn.exec().await {
                Ok(()) => return Ok(ReserveOutcome::Reserved),
                Err(StoreError::WatchConflict(key)) => {
                    tracing::debug!(%tx_id, %key, attempt, "reserve_pack lost CAS race, retrying");
                    self.retry_backoff(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ReserveOutcome::Conflict)
    }

    /// Return a reserved pack to stock. Idempotent: no reservation, no-op.
    pub async fn release_pack(&self, tx_id: &TxId) -> Result<()> {
        let reservation_key = keys::reservation(tx_id);
        for attempt in 0..self.cas_retries {
            let mut txn = self.store.txn();
            if txn.watch_get(&reservation_key).await?.is_none() {
                return Ok(());
            }
            let remaining = txn
                .watch_get(keys::STOCK)
                .await?
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            txn.put(keys::STOCK, remaining + 1);
            txn.delete(&reservation_key);
            match txn.exec().await {
                Ok(()) => return Ok(()),
                Err(StoreError::WatchConflict(key)) => {
                    tracing::debug!(%tx_id, %key, attempt, "release_pack lost CAS race, retrying");
                    self.retry_backoff(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoordinationError::Conflict(reservation_key))
    }

    /// Consume the reservation for `tx_id`: append `cards` to the player's
    /// inventory and leave a marker so duplicate application is a no-op.
    pub async fn materialize_pack(
        &self,
        tx_id: &TxId,
        player: &PlayerId,
        cards: &[CardId],
    ) -> Result<()> {
        let reservation_key = keys::reservation(tx_id);
        let marker_key = keys::materialized(tx_id);
        for attempt in 0..self.cas_retries {
            let mut txn = self.store.txn();
            if txn.watch_get(&reservation_key).await?.is_none() {
                return if txn.watch_get(&marker_key).await?.is_some() {
                    Ok(())
                } else {
                    // Neither reservation nor marker: the decide raced ahead
                    // of the reservation row settling. Callers retry.
                    Err(CoordinationError::Conflict(reservation_key))
                };
            }

            txn.list_append(
                keys::inventory(player),
                cards.iter().map(|c| c.as_str().to_string()).collect(),
            );
            txn.delete(&reservation_key);
            txn.put(&marker_key, 1i64);
            match txn.exec().await {
                Ok(()) => return Ok(()),
                Err(StoreError::WatchConflict(key)) => {
                    tracing::debug!(%tx_id, %key, attempt, "materialize_pack lost CAS race, retrying");
                    self.retry_backoff(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoordinationError::Conflict(reservation_key))
    }
}
