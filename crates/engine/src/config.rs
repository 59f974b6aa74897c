//! Engine tunables

use std::time::Duration;

/// Timeouts and bounds for one peer's transaction engine. The same values
/// must be configured on every peer of a topology.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PREPARE round-trip deadline.
    pub prepare_timeout: Duration,
    /// DECIDE round-trip deadline; longer because a participant may be busy
    /// applying.
    pub decide_timeout: Duration,
    /// Pause between DECIDE delivery retries within one round.
    pub decide_retry_pause: Duration,
    /// Age after which a non-terminal record becomes eligible for recovery.
    pub recovery_age: Duration,
    /// Blocking window after which the elected recoverer may force an abort.
    pub block_max: Duration,
    /// Recovery sweeper scan interval.
    pub sweep_interval: Duration,
    /// How long COMPLETED records stay queryable.
    pub retention: Duration,
    /// CAS retry bound within a single PREPARE attempt.
    pub cas_retries: u32,
    /// Pack stock at system bootstrap.
    pub initial_stock: i64,
    /// Cards yielded by one pack.
    pub pack_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: Duration::from_secs(2),
            decide_timeout: Duration::from_secs(5),
            decide_retry_pause: Duration::from_millis(200),
            recovery_age: Duration::from_secs(30),
            block_max: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(5),
            retention: Duration::from_secs(24 * 60 * 60),
            cas_retries: 5,
            initial_stock: 50,
            pack_size: 3,
        }
    }
}
