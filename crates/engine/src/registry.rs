//! Static peer registry
//!
//! Configured once at startup; the peer set is the participant set for every
//! transaction. Changing the set requires a full system restart.

use crate::{EngineError, Result};
use triad_common::PeerId;

/// One configured peer: identity plus transport address.
#[derive(Debug, Clone)]
pub struct PeerEndpoint {
    pub id: PeerId,
    pub address: String,
}

impl PeerEndpoint {
    pub fn new(id: impl Into<PeerId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// The ordered set of peers plus this peer's own identity.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    self_id: PeerId,
    peers: Vec<PeerEndpoint>,
}

impl PeerRegistry {
    pub fn new(self_id: PeerId, peers: Vec<PeerEndpoint>) -> Result<Self> {
        if !peers.iter().any(|p| p.id == self_id) {
            return Err(EngineError::InvalidRequest(format!(
                "own peer id {self_id} missing from configured peer set"
            )));
        }
        Ok(Self { self_id, peers })
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// The full participant set, in configured order.
    pub fn participants(&self) -> Vec<PeerId> {
        self.peers.iter().map(|p| p.id.clone()).collect()
    }

    /// Every peer except this one.
    pub fn others(&self) -> impl Iterator<Item = &PeerId> {
        let self_id = &self.self_id;
        self.peers
            .iter()
            .map(|p| &p.id)
            .filter(move |id| *id != self_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
