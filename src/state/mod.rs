//! Authoritative per-match state reconciliation.
//!
//! One `MatchState` per tracked match, refreshed from the live score cache.
//! Updates for a given match are mutually exclusive: a second caller while
//! one is in flight gets `Busy` ("no update this tick") instead of blocking
//! or racing. The (over, ball) position only ever moves forward while a
//! match is LIVE; feed regressions are ignored.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::feed::{LiveScoreCache, ScoreFeed};
use crate::models::{
    BallEvent, InningsSummary, MatchMetadata, MatchState, MatchStatus, MatchType, TrackedMatch,
};
use crate::overs;

/// Result of one reconciliation attempt.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// The (over, ball) pair advanced; the event classifies the delivery.
    Changed(BallEvent),
    /// Score moved without the ball advancing (extra) or nothing moved.
    Unchanged,
    /// A new innings started; ball position reset.
    InningsChange { completed_inning: u32 },
    /// The match just finished (or was already finished).
    Finished,
    /// Another update for this match is in flight.
    Busy,
    /// No usable live data this tick.
    NoData,
}

/// Score/position snapshot used for delta classification.
#[derive(Debug, Clone, Copy)]
pub struct ScorePoint {
    pub over: u32,
    pub ball: u32,
    pub runs: u32,
    pub wickets: u32,
}

impl ScorePoint {
    pub fn total(&self) -> u32 {
        overs::ball_total(self.over, self.ball)
    }
}

/// Classify the most recent delivery from the delta between two snapshots.
///
/// Ball advanced: wicket takes precedence, then six, boundary, dot, N runs.
/// Ball unchanged but runs up: a wide or no-ball (extra). Anything else is
/// no delivery.
pub fn classify_delta(prev: ScorePoint, next: ScorePoint, at: DateTime<Utc>) -> Option<BallEvent> {
    let runs_delta = next.runs.saturating_sub(prev.runs);
    let wicket = next.wickets > prev.wickets;

    if next.total() > prev.total() {
        Some(BallEvent {
            runs: runs_delta,
            is_wicket: wicket,
            is_boundary: !wicket && runs_delta == 4,
            is_six: !wicket && runs_delta == 6,
            is_extra: false,
            timestamp: at,
        })
    } else if next.total() == prev.total() && (runs_delta > 0 || wicket) {
        // Score moved without a legal delivery: wide/no-ball (a wicket on
        // an unchanged ball count is a run-out off an extra, still an extra
        // from the market's point of view).
        Some(BallEvent {
            runs: runs_delta,
            is_wicket: wicket,
            is_boundary: false,
            is_six: false,
            is_extra: true,
            timestamp: at,
        })
    } else {
        None
    }
}

pub struct MatchStateReconciler {
    feed: Arc<dyn ScoreFeed>,
    cache: Arc<LiveScoreCache>,
    states: RwLock<HashMap<String, MatchState>>,
    in_flight: Mutex<HashSet<String>>,
    fresh_ttl: ChronoDuration,
}

/// RAII release of the per-match update guard.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

impl MatchStateReconciler {
    pub fn new(
        feed: Arc<dyn ScoreFeed>,
        cache: Arc<LiveScoreCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            feed,
            cache,
            states: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            fresh_ttl: ChronoDuration::seconds(config.state_fresh_secs as i64),
        }
    }

    pub fn get(&self, match_id: &str) -> Option<MatchState> {
        self.states.read().get(match_id).cloned()
    }

    fn try_acquire(&self, match_id: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock();
        if set.contains(match_id) {
            return None;
        }
        set.insert(match_id.to_string());
        Some(InFlightGuard {
            set: &self.in_flight,
            key: match_id.to_string(),
        })
    }

    /// Return the cached state if fresh, otherwise bootstrap from the
    /// feed's scorecard.
    pub async fn get_or_initialize(&self, tracked: &TrackedMatch) -> Result<MatchState> {
        if let Some(state) = self.get(&tracked.match_id) {
            if Utc::now() - state.last_updated < self.fresh_ttl {
                return Ok(state);
            }
        }
        self.bootstrap(tracked).await
    }

    async fn bootstrap(&self, tracked: &TrackedMatch) -> Result<MatchState> {
        let card = match self.feed.scorecard(&tracked.external_id).await {
            Ok(card) => card,
            Err(e) => {
                warn!("scorecard bootstrap failed for {}: {:#}", tracked.match_id, e);
                None
            }
        };

        let state = match card {
            Some(card) => {
                let innings: Vec<InningsSummary> = card
                    .innings
                    .iter()
                    .map(|inn| {
                        let (over, ball) =
                            overs::parse_overs_text(&inn.overs_text).unwrap_or((0, 0));
                        InningsSummary {
                            number: inn.number,
                            batting_team: inn.batting_team.clone(),
                            runs: inn.runs,
                            wickets: inn.wickets,
                            over,
                            ball,
                        }
                    })
                    .collect();
                let current = innings.last().cloned();
                let status = if card.finished {
                    MatchStatus::Finished
                } else if current.is_some() {
                    MatchStatus::Live
                } else {
                    MatchStatus::Upcoming
                };
                MatchState {
                    match_id: tracked.match_id.clone(),
                    external_id: tracked.external_id.clone(),
                    status,
                    current_over: current.as_ref().map(|c| c.over).unwrap_or(0),
                    current_ball: current.as_ref().map(|c| c.ball).unwrap_or(0),
                    total_runs: current.as_ref().map(|c| c.runs).unwrap_or(0),
                    total_wickets: current.as_ref().map(|c| c.wickets).unwrap_or(0),
                    current_inning: current.as_ref().map(|c| c.number).unwrap_or(1),
                    innings,
                    last_ball: None,
                    last_updated: Utc::now(),
                    metadata: MatchMetadata {
                        home_team: if card.home_team.is_empty() {
                            tracked.home_team.clone()
                        } else {
                            card.home_team.clone()
                        },
                        away_team: if card.away_team.is_empty() {
                            tracked.away_team.clone()
                        } else {
                            card.away_team.clone()
                        },
                        match_type: if card.match_type.is_empty() {
                            tracked.match_type
                        } else {
                            MatchType::from_str(&card.match_type)
                        },
                        start_time: card.start_time,
                    },
                }
            }
            // Feed unavailable: register the match anyway so live updates
            // can pick it up once the cache fills.
            None => MatchState {
                match_id: tracked.match_id.clone(),
                external_id: tracked.external_id.clone(),
                status: MatchStatus::Upcoming,
                current_over: 0,
                current_ball: 0,
                total_runs: 0,
                total_wickets: 0,
                current_inning: 1,
                innings: Vec::new(),
                last_ball: None,
                last_updated: Utc::now(),
                metadata: MatchMetadata {
                    home_team: tracked.home_team.clone(),
                    away_team: tracked.away_team.clone(),
                    match_type: tracked.match_type,
                    start_time: None,
                },
            },
        };

        self.states
            .write()
            .insert(tracked.match_id.clone(), state.clone());
        info!(
            "🏏 Initialized match {} ({} vs {}) status={}",
            state.match_id,
            state.metadata.home_team,
            state.metadata.away_team,
            state.status.as_str()
        );
        Ok(state)
    }

    /// Merge the latest cached live score into the authoritative state.
    pub async fn update_from_live_data(&self, tracked: &TrackedMatch) -> Result<ReconcileOutcome> {
        let Some(_guard) = self.try_acquire(&tracked.match_id) else {
            return Ok(ReconcileOutcome::Busy);
        };

        let state = match self.get(&tracked.match_id) {
            Some(state) => state,
            None => self.get_or_initialize(tracked).await?,
        };
        if state.status == MatchStatus::Finished {
            return Ok(ReconcileOutcome::Finished);
        }

        let Some(live) = self.cache.get(&tracked.match_id) else {
            return Ok(ReconcileOutcome::NoData);
        };

        let now = Utc::now();
        let mut next = state.clone();
        next.last_updated = now;

        if live.status == MatchStatus::Finished {
            next.status = MatchStatus::Finished;
            self.commit(next);
            info!("🏁 Match {} finished", tracked.match_id);
            return Ok(ReconcileOutcome::Finished);
        }
        next.status = MatchStatus::Live;

        // Innings rollover: record the completed innings, reset position.
        if live.inning > state.current_inning {
            let completed = state.current_inning;
            next.innings.retain(|i| i.number != completed);
            next.innings.push(InningsSummary {
                number: completed,
                batting_team: String::new(),
                runs: state.total_runs,
                wickets: state.total_wickets,
                over: state.current_over,
                ball: state.current_ball,
            });
            next.current_inning = live.inning;
            next.current_over = live.over;
            next.current_ball = live.ball;
            next.total_runs = live.runs;
            next.total_wickets = live.wickets;
            next.last_ball = None;
            self.commit(next);
            info!(
                "🔄 Match {} innings change: {} complete",
                tracked.match_id, completed
            );
            return Ok(ReconcileOutcome::InningsChange {
                completed_inning: completed,
            });
        }

        let prev = ScorePoint {
            over: state.current_over,
            ball: state.current_ball,
            runs: state.total_runs,
            wickets: state.total_wickets,
        };
        let point = ScorePoint {
            over: live.over,
            ball: live.ball,
            runs: live.runs,
            wickets: live.wickets,
        };

        // Position is monotonic while LIVE; drop feed regressions.
        if point.total() < prev.total() {
            debug!(
                "ignoring position regression for {}: {} -> {}",
                tracked.match_id,
                prev.total(),
                point.total()
            );
            return Ok(ReconcileOutcome::Unchanged);
        }

        let event = classify_delta(prev, point, now);
        let advanced = point.total() > prev.total();

        next.current_over = point.over;
        next.current_ball = point.ball;
        next.total_runs = point.runs.max(prev.runs);
        next.total_wickets = point.wickets.max(prev.wickets);
        if let Some(ref ev) = event {
            next.last_ball = Some(ev.clone());
        }
        self.commit(next);

        match event {
            Some(ev) if advanced => Ok(ReconcileOutcome::Changed(ev)),
            _ => Ok(ReconcileOutcome::Unchanged),
        }
    }

    fn commit(&self, state: MatchState) {
        self.states.write().insert(state.match_id.clone(), state);
    }

    /// Drop states for matches no longer referenced, once stale past `ttl`.
    pub fn purge_stale(&self, ttl_secs: u64, referenced: &HashSet<String>) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds(ttl_secs as i64);
        let mut states = self.states.write();
        let before = states.len();
        states.retain(|id, s| referenced.contains(id) || s.last_updated > cutoff);
        before - states.len()
    }
}
