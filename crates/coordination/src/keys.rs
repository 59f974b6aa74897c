//! Logical key layout in the state store

use triad_common::{PlayerId, TxId};

pub(crate) const STOCK: &str = "stock:packs";
pub(crate) const NONTERMINAL_INDEX: &str = "tx_index:nonterminal";
pub(crate) const COMPLETED_INDEX: &str = "tx_index:completed";

pub(crate) fn reservation(tx_id: &TxId) -> String {
    format!("stock:reservations:{tx_id}")
}

/// Marker left behind when a reservation is materialized, making
/// `materialize_pack` idempotent under duplicate DECIDEs.
pub(crate) fn materialized(tx_id: &TxId) -> String {
    format!("stock:materialized:{tx_id}")
}

pub(crate) fn inventory(player: &PlayerId) -> String {
    format!("inventory:{player}")
}

pub(crate) fn swap_intent(tx_id: &TxId) -> String {
    format!("inventory:swap_intent:{tx_id}")
}

/// Marker left behind when a swap intent is applied.
pub(crate) fn swap_applied(tx_id: &TxId) -> String {
    format!("inventory:swap_applied:{tx_id}")
}

/// Claim binding one card of one player to a live swap intent. Present from
/// PREPARE until the intent is applied or cancelled.
pub(crate) fn card_claim(player: &PlayerId, card: &str) -> String {
    format!("inventory:card_claim:{player}:{card}")
}

pub(crate) fn tx_record(tx_id: &TxId) -> String {
    format!("tx:{tx_id}")
}
