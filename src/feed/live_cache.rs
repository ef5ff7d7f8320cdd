//! Short-expiry live score cache.
//!
//! One poll task walks every tracked match, preferring the ball-by-ball
//! source and falling back to the scorecard, and writes a compact
//! `LiveScoreState` with a ~30s expiry. A failing match enters a cooldown
//! window and is skipped until it elapses; one match's failure never stalls
//! the others. Writes for a given match are monotonic by poll order because
//! polling is single-threaded per tick.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::feed::client::ScoreFeed;
use crate::models::{LiveScoreState, MatchStatus, TrackedMatch};
use crate::overs;

struct CacheEntry {
    state: LiveScoreState,
    expires_at: Instant,
}

pub struct LiveScoreCache {
    feed: Arc<dyn ScoreFeed>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    failures: RwLock<HashMap<String, Instant>>,
    expiry: Duration,
    cooldown: Duration,
}

impl LiveScoreCache {
    pub fn new(feed: Arc<dyn ScoreFeed>, config: &EngineConfig) -> Self {
        Self {
            feed,
            entries: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            expiry: Duration::from_secs(config.cache_expiry_secs),
            cooldown: Duration::from_secs(config.failure_cooldown_secs),
        }
    }

    /// Cached state, or None once expired. Staleness means "unknown",
    /// never "last known".
    pub fn get(&self, match_id: &str) -> Option<LiveScoreState> {
        let entries = self.entries.read();
        let entry = entries.get(match_id)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.state.clone())
    }

    /// One poll pass over every tracked match.
    pub async fn poll(&self, tracked: &[TrackedMatch]) {
        for m in tracked {
            if self.in_cooldown(&m.match_id) {
                debug!("⏳ {} in failure cooldown, skipping", m.match_id);
                continue;
            }
            match self.refresh_one(m).await {
                Ok(true) => {
                    self.failures.write().remove(&m.match_id);
                }
                Ok(false) => {
                    debug!("no live data for {}", m.match_id);
                }
                Err(e) => {
                    warn!("score poll failed for {}: {:#}", m.match_id, e);
                    self.failures
                        .write()
                        .insert(m.match_id.clone(), Instant::now());
                }
            }
        }
    }

    fn in_cooldown(&self, match_id: &str) -> bool {
        self.failures
            .read()
            .get(match_id)
            .map(|at| at.elapsed() < self.cooldown)
            .unwrap_or(false)
    }

    async fn refresh_one(&self, m: &TrackedMatch) -> anyhow::Result<bool> {
        // Richer source first.
        if let Some(bbb) = self.feed.ball_by_ball(&m.external_id).await? {
            self.write(LiveScoreState {
                match_id: m.match_id.clone(),
                over: bbb.over,
                ball: bbb.ball,
                runs: bbb.runs,
                wickets: bbb.wickets,
                inning: bbb.inning,
                status: if bbb.finished {
                    MatchStatus::Finished
                } else {
                    MatchStatus::Live
                },
                updated_at: Utc::now(),
            });
            return Ok(true);
        }

        // Coarser fallback: derive position from the latest innings line.
        let Some(card) = self.feed.scorecard(&m.external_id).await? else {
            return Ok(false);
        };
        let Some(latest) = card.innings.last() else {
            return Ok(false);
        };
        let (over, ball) = overs::parse_overs_text(&latest.overs_text).unwrap_or((0, 0));
        self.write(LiveScoreState {
            match_id: m.match_id.clone(),
            over,
            ball,
            runs: latest.runs,
            wickets: latest.wickets,
            inning: latest.number,
            status: if card.finished {
                MatchStatus::Finished
            } else {
                MatchStatus::Live
            },
            updated_at: Utc::now(),
        });
        Ok(true)
    }

    fn write(&self, state: LiveScoreState) {
        let mut entries = self.entries.write();
        entries.insert(
            state.match_id.clone(),
            CacheEntry {
                state,
                expires_at: Instant::now() + self.expiry,
            },
        );
    }
}
