//! Transaction records, statuses, votes, and payload schemas
//!
//! The durable `TransactionRecord` in the state store is the authoritative
//! view of every transaction. Its `status` field holds the coordinator-view
//! state machine; the per-participant vote map holds the participant-view
//! VOTED_COMMIT / VOTED_ABORT states. Status transitions are monotonic and
//! enforced by `TxStatus::can_advance_to` under CAS.

use crate::{CardId, PeerId, PlayerId, Timestamp, TxId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The two transaction kinds the core supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    OpenPack,
    TradeCards,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::OpenPack => f.write_str("open_pack"),
            TxKind::TradeCards => f.write_str("trade_cards"),
        }
    }
}

/// Payload of an OPEN_PACK transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPackPayload {
    pub player_id: PlayerId,
    pub pack_template_id: String,
}

/// Payload of a TRADE_CARDS transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCardsPayload {
    pub player_a: PlayerId,
    pub cards_a_out: Vec<CardId>,
    pub player_b: PlayerId,
    pub cards_b_out: Vec<CardId>,
}

/// Kind-tagged transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxPayload {
    OpenPack(OpenPackPayload),
    TradeCards(TradeCardsPayload),
}

impl TxPayload {
    pub fn kind(&self) -> TxKind {
        match self {
            TxPayload::OpenPack(_) => TxKind::OpenPack,
            TxPayload::TradeCards(_) => TxKind::TradeCards,
        }
    }
}

/// Why a participant voted ABORT, or why a transaction was aborted.
///
/// These travel in the PREPARE response `reason` field and end up on the
/// client untouched; the client only ever sees COMMITTED or ABORTED(reason).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Pack stock is exhausted.
    OutOfStock,
    /// A traded card is not in (or no longer available from) its inventory.
    MissingCards,
    /// CAS retries exhausted under contention.
    Conflict,
    /// The state store could not be reached within the prepare window.
    StoreUnavailable,
    /// A participant could not be reached during PREPARE.
    PeerUnavailable,
    /// A participant did not answer PREPARE before the deadline.
    Timeout,
    /// The coordinator cancelled the transaction while still PREPARING.
    Cancelled,
    /// Recovery aborted a transaction blocked past its maximum window.
    Expired,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::OutOfStock => "out of stock",
            AbortReason::MissingCards => "missing cards",
            AbortReason::Conflict => "concurrency conflict",
            AbortReason::StoreUnavailable => "state store unavailable",
            AbortReason::PeerUnavailable => "peer unavailable",
            AbortReason::Timeout => "prepare timeout",
            AbortReason::Cancelled => "cancelled by coordinator",
            AbortReason::Expired => "blocked past recovery window",
        };
        f.write_str(s)
    }
}

/// A participant's durable vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Commit,
    Abort { reason: AbortReason },
}

impl Vote {
    pub fn is_commit(&self) -> bool {
        matches!(self, Vote::Commit)
    }
}

/// The coordinator's global decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Commit,
    Abort,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Commit => f.write_str("commit"),
            Decision::Abort => f.write_str("abort"),
        }
    }
}

/// Coordinator-view status of a durable transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Votes are being collected; no decision exists yet.
    Preparing,
    /// Unanimous COMMIT recorded; the decision is durable.
    GlobalCommit,
    /// At least one ABORT vote, timeout, or cancellation; durable.
    GlobalAbort,
    /// Every participant has acknowledged the decision.
    Completed,
}

impl TxStatus {
    /// Directed edges of the coordinator state machine. Everything else is a
    /// protocol violation.
    pub fn can_advance_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Preparing, TxStatus::GlobalCommit)
                | (TxStatus::Preparing, TxStatus::GlobalAbort)
                | (TxStatus::GlobalCommit, TxStatus::Completed)
                | (TxStatus::GlobalAbort, TxStatus::Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Completed)
    }

    pub fn is_decided(&self) -> bool {
        !matches!(self, TxStatus::Preparing)
    }
}

/// Status reported by a STATUS query, including the participant view.
///
/// `Unknown` answers queries for ids the store has never seen (or has purged
/// past the retention window). `VotedCommit` / `VotedAbort` surface the
/// answering participant's persisted vote while the global record is still
/// PREPARING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatusView {
    Unknown,
    Preparing,
    VotedCommit,
    VotedAbort,
    GlobalCommit,
    GlobalAbort,
    Completed,
}

/// Durable record of one distributed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: TxId,
    pub kind: TxKind,
    /// Current coordinator; recovery may reassign this by CAS.
    pub coordinator: PeerId,
    /// Full participant set, fixed at creation (always the whole registry).
    pub participants: Vec<PeerId>,
    pub payload: TxPayload,
    pub status: TxStatus,
    /// Set exactly once, when status leaves Preparing.
    pub decision: Option<Decision>,
    /// Abort reason propagated to the initiating client, if aborted.
    pub abort_reason: Option<AbortReason>,
    /// Per-participant persisted votes.
    pub votes: BTreeMap<PeerId, Vote>,
    /// Participants that have durably applied and acknowledged the decision.
    pub acks: BTreeSet<PeerId>,
    /// Last status change, for recovery eligibility.
    pub updated_at: Timestamp,
    /// Set when the record reaches Completed, for the retention window.
    pub completed_at: Option<Timestamp>,
}

impl TransactionRecord {
    pub fn new(tx_id: TxId, coordinator: PeerId, participants: Vec<PeerId>, payload: TxPayload) -> Self {
        Self {
            tx_id,
            kind: payload.kind(),
            coordinator,
            participants,
            payload,
            status: TxStatus::Preparing,
            decision: None,
            abort_reason: None,
            votes: BTreeMap::new(),
            acks: BTreeSet::new(),
            updated_at: Timestamp::now(),
            completed_at: None,
        }
    }

    /// True once every participant has a persisted vote.
    pub fn all_voted(&self) -> bool {
        self.participants.iter().all(|p| self.votes.contains_key(p))
    }

    /// True iff every persisted vote is COMMIT and every participant voted.
    pub fn unanimous_commit(&self) -> bool {
        self.all_voted() && self.votes.values().all(Vote::is_commit)
    }

    /// Participants whose decision acknowledgment is still missing.
    pub fn unacked(&self) -> Vec<PeerId> {
        self.participants
            .iter()
            .filter(|p| !self.acks.contains(*p))
            .cloned()
            .collect()
    }

    /// The participant view of this record from `peer`'s perspective.
    pub fn view_for(&self, peer: &PeerId) -> TxStatusView {
        match self.status {
            TxStatus::Preparing => match self.votes.get(peer) {
                Some(Vote::Commit) => TxStatusView::VotedCommit,
                Some(Vote::Abort { .. }) => TxStatusView::VotedAbort,
                None => TxStatusView::Preparing,
            },
            TxStatus::GlobalCommit => TxStatusView::GlobalCommit,
            TxStatus::GlobalAbort => TxStatusView::GlobalAbort,
            TxStatus::Completed => TxStatusView::Completed,
        }
    }
}
