//! Engine error types

use thiserror::Error;
use triad_common::TxId;
use triad_coordination::CoordinationError;
use triad_transport::TransportError;

/// Errors surfaced to the caller that originated a transaction. Everything
/// that can be mapped onto the 2PC decision is; these are the leftovers that
/// cannot even start or finish a protocol round.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Request rejected before a transaction was started.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No record exists for the transaction id.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(TxId),
}

pub type Result<T> = std::result::Result<T, EngineError>;
