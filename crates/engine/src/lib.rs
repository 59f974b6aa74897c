//! Peer-to-peer two-phase commit engine
//!
//! Each regional peer runs the same three roles:
//! - **Coordinator** for transactions its clients originate
//! - **Participant** for every transaction in the system
//! - **Recovery sweeper** finishing transactions whose coordinator died
//!
//! The authoritative transaction state always lives in the shared state
//! store (via `triad-coordination`); everything held in memory here is a
//! cache or in-flight bookkeeping.

mod config;
mod coordinator;
mod driver;
mod error;
mod events;
mod pack;
mod participant;
mod peer;
mod recovery;
mod registry;

pub use config::EngineConfig;
pub use coordinator::{TxCoordinator, TxOutcome};
pub use error::{EngineError, Result};
pub use events::{EventBus, GameEvent};
pub use pack::open_pack;
pub use participant::Participant;
pub use peer::Peer;
pub use recovery::RecoverySweeper;
pub use registry::{PeerEndpoint, PeerRegistry};
