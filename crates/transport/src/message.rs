//! Typed request/response messages for the 2PC protocol

use serde::{Deserialize, Serialize};
use triad_common::{Decision, PeerId, TxId, TxKind, TxPayload, TxStatusView, Vote};

/// The three RPC phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Prepare,
    Decide,
    Status,
}

/// Body of a peer-to-peer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RequestBody {
    /// Vote request. Carries the full payload so a participant can prepare
    /// without a prior read of the transaction log.
    Prepare { kind: TxKind, payload: TxPayload },
    /// Decision delivery.
    Decide { decision: Decision },
    /// Recovery status query.
    Status,
}

impl RequestBody {
    pub fn phase(&self) -> Phase {
        match self {
            RequestBody::Prepare { .. } => Phase::Prepare,
            RequestBody::Decide { .. } => Phase::Decide,
            RequestBody::Status => Phase::Status,
        }
    }
}

/// A request between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRequest {
    pub sender: PeerId,
    /// Monotonically assigned by the sending transport.
    pub seq: u64,
    pub tx_id: TxId,
    pub body: RequestBody,
}

/// A response to a peer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerResponse {
    /// Answer to PREPARE. An abort vote carries its reason.
    Vote { vote: Vote },
    /// Answer to DECIDE, sent only after the local effect is durable.
    DecideAck,
    /// Answer to STATUS.
    Status {
        status: TxStatusView,
        vote: Option<Vote>,
        decision: Option<Decision>,
    },
}
