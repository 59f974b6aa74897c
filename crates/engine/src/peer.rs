//! Peer wiring
//!
//! Assembles one regional peer: coordination service over the shared store,
//! transport endpoint on the hub, the participant server loop, the recovery
//! sweeper, and the narrow client-facing interface.

use crate::driver::TxDriver;
use crate::{
    EngineConfig, EventBus, GameEvent, Participant, PeerRegistry, RecoverySweeper, Result,
    TxCoordinator, TxOutcome,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use triad_common::{CardId, Decision, PeerId, PlayerId, TradeCardsPayload, TransactionRecord, TxClock, TxId};
use triad_coordination::CoordinationService;
use triad_store::StoreClient;
use triad_transport::{PeerHub, PeerTransport};

/// One regional peer server.
pub struct Peer {
    registry: Arc<PeerRegistry>,
    coordination: CoordinationService,
    coordinator: TxCoordinator,
    sweeper: Arc<RecoverySweeper>,
    events: EventBus,
    hub: Arc<PeerHub>,
    shutdown: watch::Sender<bool>,
    server_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

impl Peer {
    /// Start a peer: bootstrap stock (first peer wins), register on the hub,
    /// and launch the server loop and recovery sweeper.
    pub async fn start(
        registry: PeerRegistry,
        store: StoreClient,
        hub: Arc<PeerHub>,
        config: EngineConfig,
    ) -> Result<Self> {
        let registry = Arc::new(registry);
        let coordination =
            CoordinationService::new(store).with_cas_retries(config.cas_retries);
        if coordination.bootstrap_stock(config.initial_stock).await? {
            tracing::info!(stock = config.initial_stock, "pack stock bootstrapped");
        }

        let self_id = registry.self_id().clone();
        let (transport, mut inbound) = PeerTransport::new(self_id.clone(), hub.clone());
        let events = EventBus::new();
        let participant = Arc::new(Participant::new(
            registry.clone(),
            coordination.clone(),
            config.clone(),
        ));
        let driver = TxDriver {
            registry: registry.clone(),
            coordination: coordination.clone(),
            transport: Arc::new(transport),
            participant: participant.clone(),
            config: config.clone(),
            events: events.clone(),
        };
        let coordinator = TxCoordinator::new(driver.clone(), TxClock::new(self_id.clone()));
        let sweeper = RecoverySweeper::new(driver);

        let (shutdown, shutdown_rx) = watch::channel(false);

        // Server loop: incoming RPCs are handled concurrently; per-tx_id
        // serialization happens inside the participant.
        let server_task = {
            let participant = participant.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            let drain = config.decide_timeout;
            tokio::spawn(async move {
                let mut inflight = JoinSet::new();
                loop {
                    tokio::select! {
                        maybe = inbound.recv() => match maybe {
                            Some((request, reply)) => {
                                let participant = participant.clone();
                                inflight.spawn(async move {
                                    let response = participant.handle(request).await;
                                    let _ = reply.send(response);
                                });
                            }
                            None => break,
                        },
                        Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                        _ = shutdown_rx.changed() => break,
                    }
                }
                // Graceful exit: drain in-flight handlers (DECIDE application
                // in particular) for up to the decide deadline; anything left
                // is finished by recovery on a surviving peer.
                let _ = tokio::time::timeout(drain, async {
                    while inflight.join_next().await.is_some() {}
                })
                .await;
            })
        };

        let sweeper_task = sweeper.spawn(shutdown_rx);

        tracing::info!(peer = %self_id, peers = registry.len(), "peer started");
        Ok(Self {
            registry,
            coordination,
            coordinator,
            sweeper,
            events,
            hub,
            shutdown,
            server_task,
            sweeper_task,
        })
    }

    pub fn self_id(&self) -> &PeerId {
        self.registry.self_id()
    }

    /// Begin an OPEN_PACK transaction coordinated by this peer.
    pub async fn open_pack(
        &self,
        player_id: PlayerId,
        pack_template_id: &str,
    ) -> Result<TxOutcome> {
        self.coordinator.open_pack(player_id, pack_template_id).await
    }

    /// Begin a TRADE_CARDS transaction coordinated by this peer.
    pub async fn trade_cards(&self, payload: TradeCardsPayload) -> Result<TxOutcome> {
        self.coordinator.trade_cards(payload).await
    }

    /// Cancel a PREPARING transaction; returns the decision that stuck.
    pub async fn cancel(&self, tx_id: &TxId) -> Result<Decision> {
        self.coordinator.cancel(tx_id).await
    }

    /// Current inventory of a player, read from the store.
    pub async fn inventory(&self, player: &PlayerId) -> Result<Vec<CardId>> {
        Ok(self.coordination.inventory(player).await?)
    }

    /// Packs remaining in global stock.
    pub async fn stock(&self) -> Result<i64> {
        Ok(self.coordination.stock_remaining().await?)
    }

    /// Authoritative record of a transaction, if still retained.
    pub async fn transaction(&self, tx_id: &TxId) -> Result<Option<TransactionRecord>> {
        Ok(self.coordination.load_tx(tx_id).await?)
    }

    /// Subscribe to domain events published by this peer.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// Run one recovery pass immediately (the background sweeper keeps its
    /// own schedule).
    pub async fn sweep_now(&self) -> Result<()> {
        self.sweeper.sweep_once().await
    }

    /// Graceful shutdown: stop accepting requests, drain in-flight DECIDE
    /// handling for up to the decide deadline, then exit. Undelivered
    /// decisions are completed by recovery on any surviving peer.
    pub async fn shutdown(self) {
        self.hub.disconnect(self.registry.self_id());
        let _ = self.shutdown.send(true);
        let _ = self.server_task.await;
        let _ = self.sweeper_task.await;
        tracing::info!(peer = %self.registry.self_id(), "peer shut down");
    }

    /// Abrupt stop modelling a crash: no cleanup, tasks aborted mid-flight.
    /// Recovery handles everything this leaves behind.
    pub fn kill(self) {
        self.hub.disconnect(self.registry.self_id());
        self.server_task.abort();
        self.sweeper_task.abort();
        tracing::info!(peer = %self.registry.self_id(), "peer killed");
    }
}
