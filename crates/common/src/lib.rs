//! Common types for the triad transaction core
//!
//! This crate defines:
//! - Opaque identifiers for peers, players, and cards
//! - Transaction ids (HLC-based: time-ordered, sender-qualified)
//! - Transaction records, statuses, votes, and decisions
//! - Card reference data and the two transaction payload schemas
//! - Physical timestamps (microseconds since Unix epoch)

mod card;
mod id;
mod timestamp;
mod tx;

pub use card::{Card, Rank, Rarity};
pub use id::{CardId, PeerId, PlayerId, TxClock, TxId};
pub use timestamp::Timestamp;
pub use tx::{
    AbortReason, Decision, OpenPackPayload, TradeCardsPayload, TransactionRecord, TxKind,
    TxPayload, TxStatus, TxStatusView, Vote,
};
