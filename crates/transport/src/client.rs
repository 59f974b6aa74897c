//! Per-peer transport handle

use crate::hub::InboundRequest;
use crate::{PeerHub, PeerRequest, PeerResponse, RequestBody, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use triad_common::{PeerId, TxId};

/// Transport endpoint owned by one peer. Assigns sequence numbers and
/// stamps the sender id on every outgoing request.
pub struct PeerTransport {
    self_id: PeerId,
    hub: Arc<PeerHub>,
    seq: AtomicU64,
}

impl PeerTransport {
    /// Register on the hub. Returns the transport plus the inbound request
    /// stream the peer's server loop consumes.
    pub fn new(self_id: PeerId, hub: Arc<PeerHub>) -> (Self, mpsc::UnboundedReceiver<InboundRequest>) {
        let inbound = hub.register(&self_id);
        (
            Self {
                self_id,
                hub,
                seq: AtomicU64::new(0),
            },
            inbound,
        )
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// Send one request and wait for the answer under `deadline`.
    pub async fn request(
        &self,
        to: &PeerId,
        tx_id: TxId,
        body: RequestBody,
        deadline: Duration,
    ) -> Result<PeerResponse> {
        let request = PeerRequest {
            sender: self.self_id.clone(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            tx_id,
            body,
        };
        tracing::trace!(to = %to, tx_id = %request.tx_id, phase = ?request.body.phase(), "peer request");
        self.hub.deliver(to, request, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;
    use triad_common::{Decision, Vote};

    fn tx(n: u64) -> TxId {
        TxId::new(n, 0, PeerId::new("norte"))
    }

    #[tokio::test]
    async fn request_reply_roundtrip() {
        let hub = PeerHub::new();
        let (norte, _inbound) = PeerTransport::new(PeerId::new("norte"), hub.clone());
        let (_sul, mut sul_inbound) = PeerTransport::new(PeerId::new("sul"), hub.clone());

        tokio::spawn(async move {
            while let Some((req, reply)) = sul_inbound.recv().await {
                assert_eq!(req.sender, PeerId::new("norte"));
                let _ = reply.send(PeerResponse::Vote { vote: Vote::Commit });
            }
        });

        let response = norte
            .request(
                &PeerId::new("sul"),
                tx(1),
                RequestBody::Decide {
                    decision: Decision::Commit,
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(response, PeerResponse::Vote { vote: Vote::Commit });
    }

    #[tokio::test]
    async fn unknown_peer_is_unavailable() {
        let hub = PeerHub::new();
        let (norte, _inbound) = PeerTransport::new(PeerId::new("norte"), hub.clone());
        let result = norte
            .request(
                &PeerId::new("oeste"),
                tx(1),
                RequestBody::Status,
                Duration::from_millis(100),
            )
            .await;
        assert!(matches!(result, Err(TransportError::PeerUnavailable(_))));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let hub = PeerHub::new();
        let (norte, _n) = PeerTransport::new(PeerId::new("norte"), hub.clone());
        // Registered but never answering.
        let (_sul, _sul_inbound) = PeerTransport::new(PeerId::new("sul"), hub.clone());

        let result = norte
            .request(
                &PeerId::new("sul"),
                tx(1),
                RequestBody::Status,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn disconnected_peer_is_unavailable() {
        let hub = PeerHub::new();
        let (norte, _n) = PeerTransport::new(PeerId::new("norte"), hub.clone());
        let (_sul, _sul_inbound) = PeerTransport::new(PeerId::new("sul"), hub.clone());

        hub.disconnect(&PeerId::new("sul"));
        let result = norte
            .request(
                &PeerId::new("sul"),
                tx(1),
                RequestBody::Status,
                Duration::from_millis(100),
            )
            .await;
        assert!(matches!(result, Err(TransportError::PeerUnavailable(_))));
    }
}
