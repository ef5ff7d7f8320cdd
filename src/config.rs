//! Engine configuration, read once at startup from the environment.

use std::env;
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Live score poll cadence (feed -> cache).
    pub score_poll_ms: u64,
    /// Per-match lifecycle tick.
    pub lifecycle_tick_ms: u64,
    /// Slow cadence for window regeneration and purging.
    pub regen_interval_ms: u64,
    /// Delay between suspending past markets and settling them, to let the
    /// feed's ball-result fields stabilize.
    pub settle_delay_ms: u64,
    /// Match-winner settlement sweep interval.
    pub outright_poll_secs: u64,
    /// Cached live score expiry; stale entries read as "unknown".
    pub cache_expiry_secs: u64,
    /// Per-match cooldown after a feed failure.
    pub failure_cooldown_secs: u64,
    /// Reconciler state counts as fresh for this long in get_or_initialize.
    pub state_fresh_secs: u64,
    /// Reconciler states unreferenced for this long are dropped.
    pub state_ttl_secs: u64,
    /// Ball markets are generated this many balls ahead of the live
    /// position, and closed once they fall inside the gap.
    pub ball_gap: u32,
    /// New wagers are rejected within this margin of a market's close time.
    pub bet_margin_secs: u64,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            score_poll_ms: env_u64("SCORE_POLL_MS", 3_000),
            lifecycle_tick_ms: env_u64("LIFECYCLE_TICK_MS", 2_000),
            regen_interval_ms: env_u64("REGEN_INTERVAL_MS", 5_000),
            settle_delay_ms: env_u64("SETTLE_DELAY_MS", 1_000),
            outright_poll_secs: env_u64("OUTRIGHT_POLL_SECS", 60),
            cache_expiry_secs: env_u64("CACHE_EXPIRY_SECS", 30),
            failure_cooldown_secs: env_u64("FAILURE_COOLDOWN_SECS", 60),
            state_fresh_secs: env_u64("STATE_FRESH_SECS", 20),
            state_ttl_secs: env_u64("STATE_TTL_SECS", 3_600),
            ball_gap: env_u32("BALL_GAP", 3),
            bet_margin_secs: env_u64("BET_MARGIN_SECS", 10),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn regen_interval(&self) -> Duration {
        Duration::from_millis(self.regen_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            score_poll_ms: 3_000,
            lifecycle_tick_ms: 2_000,
            regen_interval_ms: 5_000,
            settle_delay_ms: 1_000,
            outright_poll_secs: 60,
            cache_expiry_secs: 30,
            failure_cooldown_secs: 60,
            state_fresh_secs: 20,
            state_ttl_secs: 3_600,
            ball_gap: 3,
            bet_margin_secs: 10,
        }
    }
}
