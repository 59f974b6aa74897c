//! Card reference data
//!
//! Cards are immutable reference data: a rank in the rock-paper-scissors
//! triangle plus a rarity tier. The core never evaluates game rules; it only
//! moves card ids between inventories.

use crate::CardId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rank of a card in the rock-paper-scissors triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rank {
    Rock,
    Paper,
    Scissors,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Rock => f.write_str("rock"),
            Rank::Paper => f.write_str("paper"),
            Rank::Scissors => f.write_str("scissors"),
        }
    }
}

/// Rarity tier of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rarity::Common => f.write_str("common"),
            Rarity::Rare => f.write_str("rare"),
            Rarity::Epic => f.write_str("epic"),
            Rarity::Legendary => f.write_str("legendary"),
        }
    }
}

/// One collectible card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub rank: Rank,
    pub rarity: Rarity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase() {
        assert_eq!(Rank::Scissors.to_string(), "scissors");
        assert_eq!(Rarity::Legendary.to_string(), "legendary");
    }
}
