//! Shared test topology: one mock store and hub, N peers
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use triad_common::{CardId, PeerId, PlayerId};
use triad_engine::{EngineConfig, Peer, PeerEndpoint, PeerRegistry, TxOutcome};
use triad_store::{MockStore, StoreClient};
use triad_transport::PeerHub;

pub const REGIONS: [&str; 5] = ["norte", "sul", "leste", "oeste", "centro"];

pub struct Cluster {
    pub store: Arc<MockStore>,
    pub hub: Arc<PeerHub>,
    pub peers: Vec<Peer>,
}

/// Tight timeouts so recovery scenarios settle quickly, and a raised CAS
/// retry bound so contention scenarios abort for business reasons
/// (OUT_OF_STOCK, MISSING_CARDS) rather than spurious CONFLICTs.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        prepare_timeout: Duration::from_secs(10),
        decide_timeout: Duration::from_secs(2),
        decide_retry_pause: Duration::from_millis(50),
        recovery_age: Duration::from_millis(200),
        block_max: Duration::from_secs(600),
        sweep_interval: Duration::from_millis(100),
        retention: Duration::from_secs(24 * 60 * 60),
        cas_retries: 500,
        initial_stock: 50,
        pack_size: 3,
    }
}

pub async fn start_cluster(names: &[&str], config: EngineConfig) -> Cluster {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();

    let store = Arc::new(MockStore::new());
    let hub = PeerHub::new();
    let endpoints: Vec<_> = names
        .iter()
        .map(|name| PeerEndpoint::new(*name, format!("http://{name}:8000")))
        .collect();

    let mut peers = Vec::new();
    for name in names {
        let registry = PeerRegistry::new(PeerId::new(*name), endpoints.clone()).unwrap();
        let peer = Peer::start(
            registry,
            StoreClient::new(store.clone()),
            hub.clone(),
            config.clone(),
        )
        .await
        .unwrap();
        peers.push(peer);
    }
    Cluster { store, hub, peers }
}

/// Open one pack for `player` via `peer` and return the materialized cards.
pub async fn open_pack_for(peer: &Peer, player: &str) -> Vec<CardId> {
    match peer
        .open_pack(PlayerId::new(player), "standard")
        .await
        .unwrap()
    {
        TxOutcome::Committed { opened, .. } => opened
            .expect("open pack yields cards")
            .into_iter()
            .map(|card| card.id)
            .collect(),
        TxOutcome::Aborted { reason, .. } => panic!("seed pack aborted: {reason}"),
    }
}

/// Poll until `probe` returns true or the timeout passes.
pub async fn wait_for<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
