//! Deterministic pack materialization
//!
//! A pack yields a fixed set of cards per (template, transaction id): every
//! peer that computes the contents of a committed pack arrives at the same
//! cards, so recovery-time re-materialization cannot fork inventories. Card
//! ids embed the transaction id, which makes them globally unique across all
//! committed packs.

use std::hash::{DefaultHasher, Hash, Hasher};
use triad_common::{Card, CardId, Rank, Rarity, TxId};

/// Open one pack. Rarity odds follow the classic 3:2:1:1 spread.
pub fn open_pack(template_id: &str, tx_id: &TxId, size: usize) -> Vec<Card> {
    (0..size)
        .map(|slot| {
            let mut hasher = DefaultHasher::new();
            template_id.hash(&mut hasher);
            tx_id.hash(&mut hasher);
            slot.hash(&mut hasher);
            let roll = hasher.finish();

            let rank = match roll % 3 {
                0 => Rank::Rock,
                1 => Rank::Paper,
                _ => Rank::Scissors,
            };
            let rarity = match (roll >> 8) % 7 {
                0..=2 => Rarity::Common,
                3..=4 => Rarity::Rare,
                5 => Rarity::Epic,
                _ => Rarity::Legendary,
            };
            Card {
                id: CardId::new(format!("card:{tx_id}:{slot}")),
                rank,
                rarity,
            }
        })
        .collect()
}
