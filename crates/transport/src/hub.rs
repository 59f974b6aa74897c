//! In-process hub standing in for the inter-region wire
//!
//! Routes a request to the registered handler of the target peer and waits
//! for the oneshot reply under the caller's deadline. Disconnecting a peer
//! makes every call to it fail with `PeerUnavailable`, which is how tests
//! model crashed regions.

use crate::{PeerRequest, PeerResponse, Result, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use triad_common::PeerId;

/// One incoming request plus the channel its answer goes back on.
pub type InboundRequest = (PeerRequest, oneshot::Sender<PeerResponse>);

const SIMULATED_LATENCY: Duration = Duration::from_micros(500);

/// Message hub shared by every peer of a topology.
pub struct PeerHub {
    endpoints: Mutex<HashMap<PeerId, mpsc::UnboundedSender<InboundRequest>>>,
}

impl PeerHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    /// Register a peer endpoint, returning the stream of inbound requests.
    /// Re-registering replaces the previous endpoint (peer restart).
    pub fn register(&self, peer: &PeerId) -> mpsc::UnboundedReceiver<InboundRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.lock().insert(peer.clone(), tx);
        rx
    }

    /// Failure injection: all subsequent calls to `peer` fail with
    /// `PeerUnavailable` until it registers again.
    pub fn disconnect(&self, peer: &PeerId) {
        self.endpoints.lock().remove(peer);
    }

    pub(crate) async fn deliver(
        &self,
        to: &PeerId,
        request: PeerRequest,
        deadline: Duration,
    ) -> Result<PeerResponse> {
        tokio::time::sleep(SIMULATED_LATENCY).await;

        let endpoint = self
            .endpoints
            .lock()
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::PeerUnavailable(to.clone()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        endpoint
            .send((request, reply_tx))
            .map_err(|_| TransportError::PeerUnavailable(to.clone()))?;

        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed(to.clone())),
            Err(_) => Err(TransportError::Timeout(to.clone())),
        }
    }
}
