//! Coordination service: the only path to the state store
//!
//! Exposes the composite atomic operations the transaction engine needs:
//! pack reservations, inventory mutation, swap intents, and the transaction
//! log. Every mutation is a WATCH/MULTI/EXEC optimistic transaction against
//! the store; CAS losers retry up to a bounded number of attempts.
//!
//! No peer caches any of this state authoritatively. Reads for business
//! decisions always go back to the store.

use thiserror::Error;
use triad_common::TxId;
use triad_store::StoreError;

mod keys;
mod log;
mod service;
mod stock;
mod swap;

pub use service::CoordinationService;

/// Default bound on CAS retries within a single PREPARE attempt.
pub const DEFAULT_CAS_RETRIES: u32 = 5;

/// Outcome of a pack reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock decremented and a reservation recorded (or already held by this
    /// transaction).
    Reserved,
    /// No packs remaining.
    OutOfStock,
    /// CAS retries exhausted under contention.
    Conflict,
}

/// Outcome of swap verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Both sides hold their cards; a swap intent is recorded.
    Prepared,
    /// A named card is absent or already claimed by another live intent.
    MissingCards,
    /// CAS retries exhausted under contention.
    Conflict,
}

/// Coordination errors
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Transport to the state store is down.
    #[error("state store unavailable")]
    StoreUnavailable,

    /// CAS retries exhausted outside the reservation paths.
    #[error("cas conflict on {0}")]
    Conflict(String),

    /// An update would break the monotonic transaction state machine, or
    /// contradict a recorded decision.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No record exists for the transaction id.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(TxId),

    /// A store value failed to decode.
    #[error("corrupt store value at {0}")]
    Corrupt(String),
}

impl From<StoreError> for CoordinationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable => CoordinationError::StoreUnavailable,
            StoreError::WatchConflict(key) => CoordinationError::Conflict(key),
            StoreError::WrongKind(key) => CoordinationError::Corrupt(key),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
