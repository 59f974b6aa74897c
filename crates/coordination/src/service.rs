//! Service handle, queries, and shared CAS plumbing

use crate::{CoordinationError, DEFAULT_CAS_RETRIES, Result, keys};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use triad_common::{CardId, PlayerId};
use triad_store::{StoreClient, StoreError, Value};

/// Typed atomic operations over the shared state store. Cheap to clone.
#[derive(Clone)]
pub struct CoordinationService {
    pub(crate) store: StoreClient,
    pub(crate) cas_retries: u32,
}

impl CoordinationService {
    pub fn new(store: StoreClient) -> Self {
        Self {
            store,
            cas_retries: DEFAULT_CAS_RETRIES,
        }
    }

    /// Override the CAS retry bound (default 5).
    pub fn with_cas_retries(mut self, retries: u32) -> Self {
        self.cas_retries = retries;
        self
    }

    /// Initialize pack stock if it has never been set. Returns whether this
    /// call performed the bootstrap.
    pub async fn bootstrap_stock(&self, initial: i64) -> Result<bool> {
        let mut txn = self.store.txn();
        if txn.watch_get(keys::STOCK).await?.is_some() {
            return Ok(false);
        }
        txn.put(keys::STOCK, initial);
        match txn.exec().await {
            Ok(()) => Ok(true),
            Err(StoreError::WatchConflict(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Packs remaining in global stock.
    pub async fn stock_remaining(&self) -> Result<i64> {
        Ok(self
            .store
            .get(keys::STOCK)
            .await?
            .and_then(|v| v.as_int())
            .unwrap_or(0))
    }

    /// Card ids currently in a player's inventory. Inventories are created
    /// lazily; an unknown player simply has none.
    pub async fn inventory(&self, player: &PlayerId) -> Result<Vec<CardId>> {
        let cards = match self.store.get(&keys::inventory(player)).await? {
            Some(Value::List(items)) => items.into_iter().map(CardId::new).collect(),
            Some(_) => return Err(CoordinationError::Corrupt(keys::inventory(player))),
            None => Vec::new(),
        };
        Ok(cards)
    }

    /// Backoff between CAS retries; grows linearly, capped so a long losing
    /// streak under heavy contention still finishes inside the prepare
    /// window.
    pub(crate) async fn retry_backoff(&self, attempt: u32) {
        let millis = u64::from(attempt.min(4)) + 1;
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    pub(crate) fn encode<T: Serialize>(&self, key: &str, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(|_| CoordinationError::Corrupt(key.to_string()))
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, key: &str, value: &Value) -> Result<T> {
        let text = value
            .as_text()
            .ok_or_else(|| CoordinationError::Corrupt(key.to_string()))?;
        serde_json::from_str(text).map_err(|_| CoordinationError::Corrupt(key.to_string()))
    }
}

/// True iff `have` contains every card in `need`, respecting multiplicity.
pub(crate) fn contains_all(have: &[String], need: &[CardId]) -> bool {
    let mut pool: Vec<&str> = have.iter().map(String::as_str).collect();
    for card in need {
        match pool.iter().position(|c| *c == card.as_str()) {
            Some(pos) => {
                pool.swap_remove(pos);
            }
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use triad_store::MockStore;

    fn service() -> CoordinationService {
        CoordinationService::new(StoreClient::new(Arc::new(MockStore::new())))
    }

    #[tokio::test]
    async fn bootstrap_is_first_writer_wins() {
        let svc = service();
        assert!(svc.bootstrap_stock(50).await.unwrap());
        assert!(!svc.bootstrap_stock(99).await.unwrap());
        assert_eq!(svc.stock_remaining().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn unknown_player_has_empty_inventory() {
        let svc = service();
        assert!(svc.inventory(&PlayerId::new("nobody")).await.unwrap().is_empty());
    }

    #[test]
    fn contains_all_respects_multiplicity() {
        let have = vec!["c1".to_string(), "c1".to_string(), "c2".to_string()];
        assert!(contains_all(&have, &[CardId::new("c1"), CardId::new("c1")]));
        assert!(!contains_all(
            &have,
            &[CardId::new("c2"), CardId::new("c2")]
        ));
        assert!(!contains_all(&have, &[CardId::new("c9")]));
    }
}
