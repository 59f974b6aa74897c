//! Domain event fan-out
//!
//! The core publishes decided transactions to whatever notification substrate
//! the surrounding system provides; here that is a broadcast channel.
//! Delivery is at-least-once and decoupled from transaction completion: a
//! dropped event is not a correctness violation.

use tokio::sync::broadcast;
use triad_common::{AbortReason, Decision, TxId, TxKind};

const EVENT_BUFFER: usize = 256;

/// Events emitted by the transaction core.
#[derive(Debug, Clone)]
pub enum GameEvent {
    TransactionDecided {
        tx_id: TxId,
        kind: TxKind,
        decision: Decision,
        abort_reason: Option<AbortReason>,
    },
}

/// Broadcast handle. Cheap to clone; subscribers that lag simply miss events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, event: GameEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triad_common::PeerId;

    #[tokio::test]
    async fn subscribers_receive_decisions() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(GameEvent::TransactionDecided {
            tx_id: TxId::new(1, 0, PeerId::new("norte")),
            kind: TxKind::OpenPack,
            decision: Decision::Commit,
            abort_reason: None,
        });
        let GameEvent::TransactionDecided { decision, .. } = rx.recv().await.unwrap();
        assert_eq!(decision, Decision::Commit);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(GameEvent::TransactionDecided {
            tx_id: TxId::new(2, 0, PeerId::new("sul")),
            kind: TxKind::TradeCards,
            decision: Decision::Abort,
            abort_reason: Some(AbortReason::MissingCards),
        });
    }
}
