//! In-memory mock of the external consistent key-value service
//!
//! This crate provides an in-memory implementation of the state-store API the
//! production system runs against a Redis-class service, allowing the
//! transaction core to be exercised end-to-end in tests.
//!
//! The store holds versioned values and supports optimistic transactions in
//! the WATCH/MULTI/EXEC style: a client records the versions of the keys it
//! read, buffers writes, and `exec` applies the whole batch atomically iff no
//! watched key changed in the meantime.

use thiserror::Error;

mod client;
mod store;
mod value;

pub use client::{OptimisticTxn, StoreClient};
pub use store::MockStore;
pub use value::Value;

/// State store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport to the store is down (injected in tests).
    #[error("state store unavailable")]
    Unavailable,

    /// A watched key changed between read and exec.
    #[error("watched key changed: {0}")]
    WatchConflict(String),

    /// An operation was applied to a value of the wrong kind.
    #[error("wrong value kind at key: {0}")]
    WrongKind(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
