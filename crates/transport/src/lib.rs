//! Peer transport: request/response RPC between named peers
//!
//! Every call carries the sender id, the transaction id, and a monotonically
//! assigned sequence number, and runs under an explicit deadline. The
//! in-process hub stands in for the wire (the production deployment speaks
//! HTTP/JSON between regions; the core only cares about the semantics), and
//! supports disconnecting a peer to model crashes.

use thiserror::Error;
use triad_common::PeerId;

mod cache;
mod client;
mod hub;
mod message;

pub use cache::ResponseCache;
pub use client::PeerTransport;
pub use hub::{InboundRequest, PeerHub};
pub use message::{PeerRequest, PeerResponse, Phase, RequestBody};

/// Transport errors. During PREPARE any of these counts as an implicit ABORT
/// vote; during DECIDE the sender retries and eventually leaves the peer to
/// recovery.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is not registered or has disconnected.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(PeerId),

    /// The peer did not answer before the call deadline.
    #[error("request to {0} timed out")]
    Timeout(PeerId),

    /// The peer dropped the request without replying.
    #[error("peer {0} closed the connection")]
    ConnectionClosed(PeerId),
}

pub type Result<T> = std::result::Result<T, TransportError>;
