//! Contention scenarios: the CAS in the coordination service is the only
//! arbiter between transactions racing for the same stock or cards.

mod support;

use std::sync::Arc;
use support::{REGIONS, start_cluster, test_config};
use tokio::task::JoinSet;
use triad_common::{AbortReason, PlayerId, TradeCardsPayload};
use triad_engine::{EngineConfig, Peer, TxOutcome};

async fn race_open_packs(peers: Vec<Peer>, requests: usize) -> Vec<TxOutcome> {
    let peers: Vec<Arc<Peer>> = peers.into_iter().map(Arc::new).collect();
    let mut tasks = JoinSet::new();
    for i in 0..requests {
        let peer = peers[i % peers.len()].clone();
        tasks.spawn(async move {
            peer.open_pack(PlayerId::new(format!("player-{i}")), "standard")
                .await
                .unwrap()
        });
    }

    let mut outcomes = Vec::with_capacity(requests);
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.unwrap());
    }
    outcomes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stock_exhaustion_race_commits_exactly_the_stock() {
    let initial_stock = 50;
    let requests = 60;
    let cluster = start_cluster(&REGIONS, test_config()).await;
    let store = cluster.store.clone();

    let outcomes = race_open_packs(cluster.peers, requests).await;

    let commits = outcomes.iter().filter(|o| o.is_committed()).count();
    let out_of_stock = outcomes
        .iter()
        .filter(|o| matches!(o, TxOutcome::Aborted { reason: AbortReason::OutOfStock, .. }))
        .count();
    assert_eq!(commits, initial_stock);
    assert_eq!(out_of_stock, requests - initial_stock);

    // Stock conservation: initial = final + packs materialized.
    let probe = triad_coordination::CoordinationService::new(triad_store::StoreClient::new(store));
    assert_eq!(probe.stock_remaining().await.unwrap(), 0);

    let mut total_cards = 0;
    for i in 0..requests {
        total_cards += probe
            .inventory(&PlayerId::new(format!("player-{i}")))
            .await
            .unwrap()
            .len();
    }
    assert_eq!(total_cards, initial_stock * 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_pack_goes_to_exactly_one_of_ten() {
    let cluster = start_cluster(
        &REGIONS,
        EngineConfig {
            initial_stock: 1,
            ..test_config()
        },
    )
    .await;
    let store = cluster.store.clone();

    let outcomes = race_open_packs(cluster.peers, 10).await;

    let commits = outcomes.iter().filter(|o| o.is_committed()).count();
    assert_eq!(commits, 1);
    assert_eq!(outcomes.len() - commits, 9);

    let probe = triad_coordination::CoordinationService::new(triad_store::StoreClient::new(store));
    assert_eq!(probe.stock_remaining().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_card_rides_exactly_one_trade() {
    let cluster = start_cluster(&["norte", "sul"], test_config()).await;
    let peers: Vec<Arc<Peer>> = cluster.peers.into_iter().map(Arc::new).collect();
    let norte = peers[0].clone();

    let alice_cards = support::open_pack_for(&norte, "alice").await;
    let bruno_cards = support::open_pack_for(&norte, "bruno").await;
    let carla_cards = support::open_pack_for(&norte, "carla").await;
    let contended = alice_cards[0].clone();

    // Two simultaneous trades both try to move Alice's card away.
    let mut tasks = JoinSet::new();
    for (counterparty, card_back) in [("bruno", bruno_cards[0].clone()), ("carla", carla_cards[0].clone())] {
        let peer = norte.clone();
        let contended = contended.clone();
        tasks.spawn(async move {
            peer.trade_cards(TradeCardsPayload {
                player_a: PlayerId::new("alice"),
                cards_a_out: vec![contended],
                player_b: PlayerId::new(counterparty),
                cards_b_out: vec![card_back],
            })
            .await
            .unwrap()
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.unwrap());
    }

    let commits = outcomes.iter().filter(|o| o.is_committed()).count();
    assert_eq!(commits, 1);
    assert!(outcomes.iter().any(
        |o| matches!(o, TxOutcome::Aborted { reason: AbortReason::MissingCards, .. })
    ));

    // The card exists exactly once across all inventories.
    let mut holders = 0;
    for player in ["alice", "bruno", "carla"] {
        let inventory = norte.inventory(&PlayerId::new(player)).await.unwrap();
        holders += inventory.iter().filter(|c| **c == contended).count();
    }
    assert_eq!(holders, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trade_conservation_under_interleaving() {
    let cluster = start_cluster(&["norte", "sul"], test_config()).await;
    let peers: Vec<Arc<Peer>> = cluster.peers.into_iter().map(Arc::new).collect();

    let alice_cards = support::open_pack_for(&peers[0], "alice").await;
    let bruno_cards = support::open_pack_for(&peers[1], "bruno").await;

    // A volley of trades between the same two players, half from each side.
    let mut tasks = JoinSet::new();
    for i in 0..3usize {
        let peer = peers[i % 2].clone();
        let a = alice_cards[i].clone();
        let b = bruno_cards[i].clone();
        tasks.spawn(async move {
            peer.trade_cards(TradeCardsPayload {
                player_a: PlayerId::new("alice"),
                cards_a_out: vec![a],
                player_b: PlayerId::new("bruno"),
                cards_b_out: vec![b],
            })
            .await
            .unwrap()
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    // Per-card conservation: every card exists exactly once, and the two
    // inventories still hold three cards each.
    let alice = peers[0].inventory(&PlayerId::new("alice")).await.unwrap();
    let bruno = peers[0].inventory(&PlayerId::new("bruno")).await.unwrap();
    assert_eq!(alice.len(), 3);
    assert_eq!(bruno.len(), 3);
    for card in alice_cards.iter().chain(bruno_cards.iter()) {
        let count = alice.iter().filter(|c| *c == card).count()
            + bruno.iter().filter(|c| *c == card).count();
        assert_eq!(count, 1, "card {card} duplicated or lost");
    }
}
