//! Core store state: versioned entries behind a single lock
//!
//! Every mutation goes through [`MockStore::exec`], which checks the watched
//! versions and applies the write batch under one critical section. That is
//! the serialization point the whole transaction core leans on.

use crate::{Result, StoreError, Value};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// A buffered write applied by `exec`.
#[derive(Debug, Clone)]
pub(crate) enum WriteOp {
    Put(String, Value),
    Delete(String),
    /// RPUSH-style append; creates the list if absent.
    ListAppend(String, Vec<String>),
    /// LREM-style removal of the first matching item.
    ListRemove(String, String),
    /// SADD-style insert; creates the set if absent.
    SetAdd(String, String),
    /// SREM-style removal; deletes nothing if absent.
    SetRemove(String, String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    version: u64,
}

/// In-memory mock of the external consistent KV service.
///
/// Shared by every peer in a test topology (the production deployment points
/// all peers at one replicated service, so one shared instance models it).
pub struct MockStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Failure injection: while unavailable, every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Read a value with its current version. `None` means the key is absent.
    pub(crate) fn get_versioned(&self, key: &str) -> Result<Option<(Value, u64)>> {
        self.check_available()?;
        let entries = self.entries.lock();
        Ok(entries.get(key).map(|e| (e.value.clone(), e.version)))
    }

    /// Atomically apply `ops` iff every watched key still has the observed
    /// version (`None` = observed absent).
    pub(crate) fn exec(
        &self,
        watches: &[(String, Option<u64>)],
        ops: Vec<WriteOp>,
    ) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.lock();

        for (key, observed) in watches {
            let current = entries.get(key).map(|e| e.version);
            if current != *observed {
                return Err(StoreError::WatchConflict(key.clone()));
            }
        }

        for op in ops {
            match op {
                WriteOp::Put(key, value) => {
                    let version = entries.get(&key).map(|e| e.version).unwrap_or(0) + 1;
                    entries.insert(key, Entry { value, version });
                }
                WriteOp::Delete(key) => {
                    entries.remove(&key);
                }
                WriteOp::ListAppend(key, items) => {
                    let entry = entries.entry(key.clone()).or_insert(Entry {
                        value: Value::List(Vec::new()),
                        version: 0,
                    });
                    match &mut entry.value {
                        Value::List(list) => list.extend(items),
                        _ => return Err(StoreError::WrongKind(key)),
                    }
                    entry.version += 1;
                }
                WriteOp::ListRemove(key, item) => {
                    if let Some(entry) = entries.get_mut(&key) {
                        match &mut entry.value {
                            Value::List(list) => {
                                if let Some(pos) = list.iter().position(|x| *x == item) {
                                    list.remove(pos);
                                    entry.version += 1;
                                }
                            }
                            _ => return Err(StoreError::WrongKind(key)),
                        }
                    }
                }
                WriteOp::SetAdd(key, member) => {
                    let entry = entries.entry(key.clone()).or_insert(Entry {
                        value: Value::Set(BTreeSet::new()),
                        version: 0,
                    });
                    match &mut entry.value {
                        Value::Set(set) => {
                            set.insert(member);
                        }
                        _ => return Err(StoreError::WrongKind(key)),
                    }
                    entry.version += 1;
                }
                WriteOp::SetRemove(key, member) => {
                    if let Some(entry) = entries.get_mut(&key) {
                        match &mut entry.value {
                            Value::Set(set) => {
                                set.remove(&member);
                                entry.version += 1;
                            }
                            _ => return Err(StoreError::WrongKind(key)),
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_rejects_stale_watch() {
        let store = MockStore::new();
        store
            .exec(&[], vec![WriteOp::Put("k".into(), Value::Int(1))])
            .unwrap();
        let (_, version) = store.get_versioned("k").unwrap().unwrap();

        // Concurrent writer bumps the version.
        store
            .exec(&[], vec![WriteOp::Put("k".into(), Value::Int(2))])
            .unwrap();

        let result = store.exec(
            &[("k".into(), Some(version))],
            vec![WriteOp::Put("k".into(), Value::Int(3))],
        );
        assert!(matches!(result, Err(StoreError::WatchConflict(_))));
        assert_eq!(
            store.get_versioned("k").unwrap().unwrap().0,
            Value::Int(2)
        );
    }

    #[test]
    fn watch_on_absent_key_conflicts_once_created() {
        let store = MockStore::new();
        // Observed absent.
        assert!(store.get_versioned("claim").unwrap().is_none());

        // Someone else creates it first.
        store
            .exec(&[], vec![WriteOp::Put("claim".into(), Value::Int(1))])
            .unwrap();

        let result = store.exec(
            &[("claim".into(), None)],
            vec![WriteOp::Put("claim".into(), Value::Int(2))],
        );
        assert!(matches!(result, Err(StoreError::WatchConflict(_))));
    }

    #[test]
    fn list_and_set_ops() {
        let store = MockStore::new();
        store
            .exec(
                &[],
                vec![
                    WriteOp::ListAppend("inv".into(), vec!["c1".into(), "c2".into()]),
                    WriteOp::SetAdd("idx".into(), "t1".into()),
                ],
            )
            .unwrap();
        store
            .exec(
                &[],
                vec![
                    WriteOp::ListRemove("inv".into(), "c1".into()),
                    WriteOp::SetRemove("idx".into(), "t1".into()),
                ],
            )
            .unwrap();

        let (inv, _) = store.get_versioned("inv").unwrap().unwrap();
        assert_eq!(inv.as_list().unwrap(), ["c2".to_string()]);
        let (idx, _) = store.get_versioned("idx").unwrap().unwrap();
        assert!(idx.as_set().unwrap().is_empty());
    }

    #[test]
    fn unavailable_store_rejects_everything() {
        let store = MockStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_versioned("k"),
            Err(StoreError::Unavailable)
        ));
        assert!(matches!(
            store.exec(&[], vec![]),
            Err(StoreError::Unavailable)
        ));
        store.set_unavailable(false);
        assert!(store.get_versioned("k").unwrap().is_none());
    }
}
