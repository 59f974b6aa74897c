//! Identifiers and the transaction id clock
//!
//! Transaction ids follow the hybrid-logical-clock shape: physical time in
//! microseconds, a logical counter for uniqueness within the same microsecond,
//! and the generating peer. The total ordering is physical, then logical,
//! then peer id, which gives every transaction a globally unique, time-ordered,
//! sender-qualified identity.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id! {
    /// Identity of one regional peer server.
    PeerId
}

opaque_id! {
    /// Opaque player identity.
    PlayerId
}

opaque_id! {
    /// Opaque card identity.
    CardId
}

/// Transaction identifier: unique, time-ordered, sender-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId {
    /// Physical time component (microseconds since Unix epoch)
    pub physical: u64,
    /// Logical counter for uniqueness within the same physical tick
    pub logical: u32,
    /// Peer that generated this id
    pub peer: PeerId,
}

impl TxId {
    pub const fn new(physical: u64, logical: u32, peer: PeerId) -> Self {
        Self {
            physical,
            logical,
            peer,
        }
    }

    /// Parse from the `physical_logical_peer` display format.
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut parts = s.splitn(3, '_');
        let physical = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("invalid physical component in tx id: {s}"))?;
        let logical = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("invalid logical component in tx id: {s}"))?;
        let peer = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("missing peer component in tx id: {s}"))?;
        Ok(Self::new(physical, logical, PeerId::new(peer)))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.physical, self.logical, self.peer)
    }
}

/// Clock that issues monotonically increasing transaction ids for one peer.
///
/// If the wall clock stalls or runs backwards, the logical counter keeps ids
/// strictly increasing.
pub struct TxClock {
    peer: PeerId,
    state: Mutex<(u64, u32)>,
}

impl TxClock {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            state: Mutex::new((0, 0)),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Issue the next transaction id.
    pub fn next(&self) -> TxId {
        let now = now_micros();
        let mut state = self.state.lock();
        if now > state.0 {
            *state = (now, 0);
        } else {
            state.1 += 1;
        }
        TxId::new(state.0, state.1, self.peer.clone())
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_ids_are_strictly_increasing() {
        let clock = TxClock::new(PeerId::new("norte"));
        let mut prev = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn tx_id_display_roundtrip() {
        let clock = TxClock::new(PeerId::new("sul"));
        let id = clock.next();
        let parsed = TxId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn tx_ids_from_different_peers_never_collide() {
        let a = TxId::new(42, 0, PeerId::new("norte"));
        let b = TxId::new(42, 0, PeerId::new("sul"));
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(TxId::parse("not-an-id").is_err());
        assert!(TxId::parse("12_34").is_err());
        assert!(TxId::parse("12_34_").is_err());
    }
}
