//! Async client handle over the mock store
//!
//! Follows the production client API: plain reads, and an optimistic
//! transaction object for the WATCH/MULTI/EXEC path. A small sleep per call
//! simulates the network hop to the external service.

use crate::store::WriteOp;
use crate::{MockStore, Result, Value};
use std::sync::Arc;
use std::time::Duration;

const SIMULATED_LATENCY: Duration = Duration::from_micros(200);

/// Client handle to the state store. Cheap to clone.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<MockStore>,
}

impl StoreClient {
    pub fn new(store: Arc<MockStore>) -> Self {
        Self { store }
    }

    async fn hop(&self) {
        tokio::time::sleep(SIMULATED_LATENCY).await;
    }

    /// Plain read, not serialized with in-flight transactions.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.hop().await;
        Ok(self.store.get_versioned(key)?.map(|(v, _)| v))
    }

    /// Start an optimistic transaction.
    pub fn txn(&self) -> OptimisticTxn {
        OptimisticTxn {
            store: self.store.clone(),
            watches: Vec::new(),
            ops: Vec::new(),
        }
    }
}

/// WATCH/MULTI/EXEC-style optimistic transaction.
///
/// `watch_get` records the observed version of a key; write methods buffer
/// operations; [`OptimisticTxn::exec`] applies the batch atomically iff no
/// watched key changed. Dropping the transaction discards it.
pub struct OptimisticTxn {
    store: Arc<MockStore>,
    watches: Vec<(String, Option<u64>)>,
    ops: Vec<WriteOp>,
}

impl OptimisticTxn {
    /// Read a key and watch it: `exec` fails if it changes afterwards.
    /// Watching an absent key guards against concurrent creation.
    pub async fn watch_get(&mut self, key: &str) -> Result<Option<Value>> {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        let read = self.store.get_versioned(key)?;
        self.watches
            .push((key.to_string(), read.as_ref().map(|(_, v)| *v)));
        Ok(read.map(|(v, _)| v))
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.ops.push(WriteOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(WriteOp::Delete(key.into()));
    }

    pub fn list_append(&mut self, key: impl Into<String>, items: Vec<String>) {
        self.ops.push(WriteOp::ListAppend(key.into(), items));
    }

    pub fn list_remove(&mut self, key: impl Into<String>, item: impl Into<String>) {
        self.ops.push(WriteOp::ListRemove(key.into(), item.into()));
    }

    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) {
        self.ops.push(WriteOp::SetAdd(key.into(), member.into()));
    }

    pub fn set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) {
        self.ops.push(WriteOp::SetRemove(key.into(), member.into()));
    }

    /// Apply the batch atomically. Fails with
    /// [`crate::StoreError::WatchConflict`] if any watched key changed.
    pub async fn exec(self) -> Result<()> {
        tokio::time::sleep(SIMULATED_LATENCY).await;
        self.store.exec(&self.watches, self.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    #[tokio::test]
    async fn optimistic_txn_applies_batch() {
        let client = StoreClient::new(Arc::new(MockStore::new()));
        let mut txn = client.txn();
        assert!(txn.watch_get("stock").await.unwrap().is_none());
        txn.put("stock", 50i64);
        txn.set_add("index", "t1");
        txn.exec().await.unwrap();

        assert_eq!(client.get("stock").await.unwrap(), Some(Value::Int(50)));
    }

    #[tokio::test]
    async fn optimistic_txn_loses_race() {
        let client = StoreClient::new(Arc::new(MockStore::new()));

        let mut setup = client.txn();
        setup.put("stock", 1i64);
        setup.exec().await.unwrap();

        let mut first = client.txn();
        let stock = first.watch_get("stock").await.unwrap().unwrap();
        let mut second = client.txn();
        second.watch_get("stock").await.unwrap();

        first.put("stock", stock.as_int().unwrap() - 1);
        first.exec().await.unwrap();

        second.put("stock", 0i64);
        assert!(matches!(
            second.exec().await,
            Err(StoreError::WatchConflict(_))
        ));
    }

    #[tokio::test]
    async fn dropped_txn_writes_nothing() {
        let client = StoreClient::new(Arc::new(MockStore::new()));
        let mut txn = client.txn();
        txn.put("stock", 10i64);
        drop(txn);
        assert!(client.get("stock").await.unwrap().is_none());
    }
}
