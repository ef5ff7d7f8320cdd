//! Per-match lifecycle tick.
//!
//! Sequencing rule: when the ball advances, every open market is suspended
//! BEFORE any settlement, so there is no window in which a bettor can wager
//! on an outcome that is already knowable. Settlement of the markets whose
//! event just happened runs after a short stabilization delay. On quiet
//! ticks the forward window is regenerated on a slower cadence. A feed
//! hiccup skips the tick; state only ever moves forward.
//!
//! This coordinator is the only settlement trigger for instance markets.
//! The outright sweep settles match-winner bets exclusively, and the
//! SETTLED terminal status makes any accidental second caller a no-op.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::events::EventPublisher;
use crate::markets::odds;
use crate::markets::registry::MarketRegistry;
use crate::models::{BallEvent, InstanceType, MatchState, MatchStatus, ServerEvent, TrackedMatch};
use crate::settlement::InstanceSettlement;
use crate::state::{MatchStateReconciler, ReconcileOutcome};
use crate::store::Store;

/// Wall-clock estimate per remaining delivery, for market close times.
const SECS_PER_BALL: i64 = 30;

/// Deliveries older than this many balls drop out of the recorded-outcome
/// history.
const OUTCOME_HISTORY_BALLS: u32 = 40;

#[derive(Default)]
struct MatchTrack {
    /// Market ids suspended on a ball change, awaiting settlement.
    pending: Vec<String>,
    pending_since: Option<Instant>,
    last_regen: Option<Instant>,
    /// Position at the previous ball change, to tell single-delivery
    /// advances from feed skips.
    last_total: Option<u32>,
    /// (over, runs at the start of that over), for over-market settlement.
    over_anchor: Option<(u32, u32)>,
    /// Completed over -> runs scored in it.
    over_runs: HashMap<u32, u32>,
    /// Delivery total -> classified outcome label. Only single-ball
    /// advances record here; a skipped delivery stays unknowable and its
    /// market voids.
    ball_outcomes: HashMap<u32, String>,
}

pub struct MatchLifecycleCoordinator {
    config: EngineConfig,
    registry: Arc<MarketRegistry>,
    reconciler: Arc<MatchStateReconciler>,
    settlement: Arc<InstanceSettlement>,
    store: Arc<Store>,
    publisher: EventPublisher,
    tracks: Mutex<HashMap<String, MatchTrack>>,
}

impl MatchLifecycleCoordinator {
    pub fn new(
        config: EngineConfig,
        registry: Arc<MarketRegistry>,
        reconciler: Arc<MatchStateReconciler>,
        settlement: Arc<InstanceSettlement>,
        store: Arc<Store>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            config,
            registry,
            reconciler,
            settlement,
            store,
            publisher,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    /// One tick for one match. Errors are the caller's cue to skip and
    /// retry next tick; nothing here reverts a CLOSED or SETTLED market.
    pub async fn tick(&self, tracked: &TrackedMatch) -> Result<()> {
        let outcome = self.reconciler.update_from_live_data(tracked).await?;

        match outcome {
            ReconcileOutcome::Changed(event) => {
                if let Some(state) = self.reconciler.get(&tracked.match_id) {
                    self.on_ball_change(&state, &event);
                }
            }
            ReconcileOutcome::InningsChange { completed_inning } => {
                if let Some(state) = self.reconciler.get(&tracked.match_id) {
                    self.on_innings_change(&state, completed_inning).await?;
                }
            }
            ReconcileOutcome::Finished => {
                self.on_match_finished(tracked).await?;
                return Ok(());
            }
            ReconcileOutcome::Unchanged
            | ReconcileOutcome::Busy
            | ReconcileOutcome::NoData => {}
        }

        // Pending settlement fires on whichever tick finds the delay
        // elapsed, even if this one brought no new data.
        if self.pending_ripe(&tracked.match_id) {
            self.settle_pending(&tracked.match_id).await?;
        } else if self.regen_due(&tracked.match_id) {
            self.regenerate(&tracked.match_id);
        }

        Ok(())
    }

    // ===== Ball change path (synchronous: suspension must be immediate) =====

    fn on_ball_change(&self, state: &MatchState, event: &BallEvent) {
        let match_id = &state.match_id;
        let current_total = state.ball_total();

        // 1. Suspend before anything else.
        let suspended = self.registry.suspend_open_markets(match_id);

        // 2. Collect markets whose event has now happened.
        let settleable = self.registry.settleable_markets(match_id, current_total);

        {
            let mut tracks = self.tracks.lock();
            let track = tracks.entry(match_id.clone()).or_default();

            // The classification is exact only when exactly one delivery
            // landed; a multi-ball skip leaves those deliveries unknowable.
            if track.last_total == Some(current_total.saturating_sub(1)) && current_total > 0 {
                track
                    .ball_outcomes
                    .insert(current_total - 1, event.outcome_label());
            }
            track.last_total = Some(current_total);
            let horizon = current_total.saturating_sub(OUTCOME_HISTORY_BALLS);
            track.ball_outcomes.retain(|&total, _| total >= horizon);

            // Over tally: the ball that moved position to O.0 was the last
            // ball of over O-1.
            match track.over_anchor {
                Some((anchor_over, anchor_runs)) if state.current_over > anchor_over => {
                    track
                        .over_runs
                        .insert(anchor_over, state.total_runs.saturating_sub(anchor_runs));
                    track.over_anchor = Some((state.current_over, state.total_runs));
                }
                None => {
                    track.over_anchor = Some((state.current_over, state.total_runs));
                }
                _ => {}
            }

            for market in &settleable {
                if !track.pending.contains(&market.id) {
                    track.pending.push(market.id.clone());
                }
            }
            if !track.pending.is_empty() && track.pending_since.is_none() {
                track.pending_since = Some(Instant::now());
            }
        }

        // 3. Close anything inside the gap ("imminent present").
        self.registry
            .close_markets_for_past_events(match_id, state.current_over, state.current_ball);

        // 4. Clients see the suspension without delay.
        self.publisher.publish_to_match(
            match_id,
            ServerEvent::ScoreUpdate {
                match_id: match_id.clone(),
                over: state.current_over,
                ball: state.current_ball,
                runs: state.total_runs,
                wickets: state.total_wickets,
            },
        );
        self.publish_market_update(match_id);

        debug!(
            "⚡ {} ball change to {}.{}: {} suspended, {} pending settlement",
            match_id,
            state.current_over,
            state.current_ball,
            suspended.len(),
            settleable.len()
        );
    }

    fn pending_ripe(&self, match_id: &str) -> bool {
        let tracks = self.tracks.lock();
        tracks
            .get(match_id)
            .and_then(|t| t.pending_since)
            .map(|since| since.elapsed() >= self.config.settle_delay())
            .unwrap_or(false)
    }

    fn regen_due(&self, match_id: &str) -> bool {
        let mut tracks = self.tracks.lock();
        let track = tracks.entry(match_id.to_string()).or_default();
        if !track.pending.is_empty() {
            return false;
        }
        let due = track
            .last_regen
            .map(|at| at.elapsed() >= self.config.regen_interval())
            .unwrap_or(true);
        if due {
            track.last_regen = Some(Instant::now());
        }
        due
    }

    // ===== Delayed settlement path =====

    async fn settle_pending(&self, match_id: &str) -> Result<()> {
        let (pending, over_runs, ball_outcomes) = {
            let mut tracks = self.tracks.lock();
            let Some(track) = tracks.get_mut(match_id) else {
                return Ok(());
            };
            track.pending_since = None;
            (
                std::mem::take(&mut track.pending),
                track.over_runs.clone(),
                track.ball_outcomes.clone(),
            )
        };
        if pending.is_empty() {
            return Ok(());
        }

        for market_id in pending {
            let Some(market) = self.registry.get(&market_id) else {
                continue;
            };
            match market.instance_type {
                InstanceType::NextBall => {
                    // A delivery the feed skipped was never classified and
                    // voids.
                    let label = market
                        .ball_total()
                        .and_then(|t| ball_outcomes.get(&t).cloned());
                    match label {
                        Some(label) => {
                            if let Err(e) = self
                                .settlement
                                .settle_market(&self.registry, &market_id, &label)
                                .await
                            {
                                warn!("settlement failed for {}: {:#}", market_id, e);
                            }
                        }
                        None => {
                            if let Err(e) =
                                self.settlement.void_market(&self.registry, &market_id).await
                            {
                                warn!("void failed for {}: {:#}", market_id, e);
                            }
                        }
                    }
                }
                InstanceType::NextOver | InstanceType::CurrentOver => {
                    let runs = market.over_number.and_then(|o| over_runs.get(&o).copied());
                    match runs {
                        Some(runs) => {
                            let label = odds::over_runs_label(runs);
                            if let Err(e) = self
                                .settlement
                                .settle_market(&self.registry, &market_id, label)
                                .await
                            {
                                warn!("settlement failed for {}: {:#}", market_id, e);
                            }
                        }
                        None => {
                            if let Err(e) =
                                self.settlement.void_market(&self.registry, &market_id).await
                            {
                                warn!("void failed for {}: {:#}", market_id, e);
                            }
                        }
                    }
                }
                // Session and player markets settle at innings/match
                // boundaries, not on ball advancement.
                _ => {}
            }
        }

        self.publish_market_update(match_id);
        Ok(())
    }

    // ===== Quiet-tick path =====

    fn regenerate(&self, match_id: &str) {
        let Some(state) = self.reconciler.get(match_id) else {
            return;
        };
        if state.status != MatchStatus::Live {
            return;
        }
        let current_total = state.ball_total();
        let max_over = state.metadata.match_type.max_overs();

        // Critical moments hold every market suspended. On a quiet tick
        // with no critical moment, anything still suspended is a
        // future-window market (the ball-change path closed everything
        // inside the gap), so it is safe to resume trading.
        if let Some(moment) = self.registry.check_critical_moments(&state) {
            let suspended = self.registry.suspend_open_markets(match_id);
            if !suspended.is_empty() {
                info!(
                    "⛔ {} critical moment {:?}: suspended {} markets",
                    match_id,
                    moment,
                    suspended.len()
                );
                self.publish_market_update(match_id);
            }
            return;
        }
        let reopened = self.registry.reopen_suspended(match_id);
        if !reopened.is_empty() {
            info!("▶️  {} reopened {} markets", match_id, reopened.len());
        }

        let created = self
            .registry
            .ensure_ball_window(match_id, current_total, max_over);
        self.registry.ensure_over_market(
            match_id,
            state.current_over + 1,
            overs_remaining_secs(&state).max(SECS_PER_BALL),
        );
        self.registry.ensure_session_market(
            match_id,
            state.current_inning,
            (max_over as i64 * 6 * SECS_PER_BALL).max(SECS_PER_BALL),
        );

        // Defensive cleanup: close anything that drifted into the past
        // between regeneration ticks, then drop long-settled markets.
        self.registry
            .close_markets_for_past_events(match_id, state.current_over, state.current_ball);
        self.registry.purge_outside_window(match_id, current_total);

        if created > 0 {
            self.publish_market_update(match_id);
        }
    }

    // ===== Boundary paths =====

    async fn on_innings_change(&self, state: &MatchState, completed_inning: u32) -> Result<()> {
        let match_id = &state.match_id;
        info!("🔁 {} innings {} complete", match_id, completed_inning);

        // Session markets for the finished innings settle on its total.
        let innings_runs = state
            .innings
            .iter()
            .find(|i| i.number == completed_inning)
            .map(|i| i.runs);
        for market in self.registry.session_markets(match_id, completed_inning) {
            match innings_runs {
                Some(runs) => {
                    let label = odds::session_total_label(runs);
                    if let Err(e) = self
                        .settlement
                        .settle_market(&self.registry, &market.id, label)
                        .await
                    {
                        warn!("session settlement failed for {}: {:#}", market.id, e);
                    }
                }
                None => {
                    let _ = self.settlement.void_market(&self.registry, &market.id).await;
                }
            }
        }

        // Ball/over markets from the ended innings either settle on a
        // recorded outcome (the innings-ending delivery still counts) or
        // reference deliveries that will never be bowled and void.
        let (over_runs, ball_outcomes) = {
            let tracks = self.tracks.lock();
            tracks
                .get(match_id)
                .map(|t| (t.over_runs.clone(), t.ball_outcomes.clone()))
                .unwrap_or_default()
        };
        let leftovers = self.registry.open_markets_for_match(match_id);
        for market in leftovers {
            let label = match market.instance_type {
                InstanceType::NextBall => market
                    .ball_total()
                    .and_then(|t| ball_outcomes.get(&t).cloned()),
                InstanceType::NextOver | InstanceType::CurrentOver => market
                    .over_number
                    .and_then(|o| over_runs.get(&o).copied())
                    .map(|runs| odds::over_runs_label(runs).to_string()),
                _ => continue,
            };
            let result = match label {
                Some(label) => {
                    self.settlement
                        .settle_market(&self.registry, &market.id, &label)
                        .await
                }
                None => self.settlement.void_market(&self.registry, &market.id).await,
            };
            if let Err(e) = result {
                warn!("innings-boundary settlement failed for {}: {:#}", market.id, e);
            }
        }

        // Fresh anchors for the new innings.
        {
            let mut tracks = self.tracks.lock();
            let track = tracks.entry(match_id.clone()).or_default();
            track.pending.clear();
            track.pending_since = None;
            track.last_total = None;
            track.over_anchor = Some((state.current_over, state.total_runs));
            track.over_runs.clear();
            track.ball_outcomes.clear();
        }
        self.publish_market_update(match_id);
        Ok(())
    }

    async fn on_match_finished(&self, tracked: &TrackedMatch) -> Result<()> {
        let match_id = &tracked.match_id;
        let state = self.reconciler.get(match_id);
        let (over_runs, ball_outcomes) = self
            .tracks
            .lock()
            .remove(match_id)
            .map(|t| (t.over_runs, t.ball_outcomes))
            .unwrap_or_default();

        let remaining = self.registry.open_markets_for_match(match_id);
        if !remaining.is_empty() {
            info!(
                "🏁 {} finished with {} unsettled markets",
                match_id,
                remaining.len()
            );
        }
        for market in remaining {
            // Anything whose outcome is on record settles; the final innings
            // total is also known, so its session market settles properly.
            // Everything else voids.
            let label = match market.instance_type {
                InstanceType::NextBall => market
                    .ball_total()
                    .and_then(|t| ball_outcomes.get(&t).cloned()),
                InstanceType::NextOver | InstanceType::CurrentOver => market
                    .over_number
                    .and_then(|o| over_runs.get(&o).copied())
                    .map(|runs| odds::over_runs_label(runs).to_string()),
                InstanceType::Session => state.as_ref().and_then(|s| {
                    (market.event_reference == format!("innings {}", s.current_inning))
                        .then(|| odds::session_total_label(s.total_runs).to_string())
                }),
                _ => None,
            };
            let result = match label {
                Some(label) => {
                    self.settlement
                        .settle_market(&self.registry, &market.id, &label)
                        .await
                }
                None => self.settlement.void_market(&self.registry, &market.id).await,
            };
            if let Err(e) = result {
                warn!("end-of-match settlement failed for {}: {:#}", market.id, e);
            }
        }

        self.store
            .set_match_status(match_id, MatchStatus::Finished)
            .await?;
        self.publish_market_update(match_id);
        Ok(())
    }

    fn publish_market_update(&self, match_id: &str) {
        self.publisher.publish_to_match(
            match_id,
            ServerEvent::MarketUpdate {
                match_id: match_id.to_string(),
                markets: self.registry.active_for_match(match_id),
            },
        );
    }
}

fn overs_remaining_secs(state: &MatchState) -> i64 {
    let remaining_balls =
        (crate::overs::BALLS_PER_OVER - state.current_ball.min(5)) as i64;
    remaining_balls * SECS_PER_BALL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::ScriptedFeed;
    use crate::feed::types::BallByBallSnapshot;
    use crate::feed::LiveScoreCache;
    use crate::models::{MarketStatus, MatchType};
    use crate::store::PlacementOutcome;

    struct Harness {
        feed: Arc<ScriptedFeed>,
        cache: Arc<LiveScoreCache>,
        registry: Arc<MarketRegistry>,
        store: Arc<Store>,
        coordinator: MatchLifecycleCoordinator,
        tracked: TrackedMatch,
    }

    fn harness() -> Harness {
        harness_with_delay(0)
    }

    fn harness_with_delay(settle_delay_ms: u64) -> Harness {
        let mut config = EngineConfig::default();
        config.settle_delay_ms = settle_delay_ms;
        config.regen_interval_ms = 0;

        let feed = Arc::new(ScriptedFeed::default());
        let cache = Arc::new(LiveScoreCache::new(feed.clone(), &config));
        let reconciler = Arc::new(MatchStateReconciler::new(
            feed.clone(),
            cache.clone(),
            &config,
        ));
        let registry = Arc::new(MarketRegistry::new(&config));
        let store = Arc::new(Store::open_in_memory().unwrap());
        let publisher = EventPublisher::new(64);
        let settlement = Arc::new(InstanceSettlement::new(store.clone(), publisher.clone()));
        let coordinator = MatchLifecycleCoordinator::new(
            config,
            registry.clone(),
            reconciler,
            settlement,
            store.clone(),
            publisher,
        );
        Harness {
            feed,
            cache,
            registry,
            store,
            coordinator,
            tracked: TrackedMatch {
                match_id: "m1".to_string(),
                external_id: "ext-m1".to_string(),
                sport: "cricket".to_string(),
                home_team: "Mumbai Indians".to_string(),
                away_team: "Chennai Super Kings".to_string(),
                match_type: MatchType::T20,
                status: crate::models::MatchStatus::Live,
            },
        }
    }

    impl Harness {
        async fn advance(&self, over: u32, ball: u32, runs: u32, wickets: u32) {
            self.feed.push_ball_by_ball(
                "ext-m1",
                BallByBallSnapshot {
                    inning: 1,
                    over,
                    ball,
                    runs,
                    wickets,
                    finished: false,
                },
            );
            self.cache.poll(std::slice::from_ref(&self.tracked)).await;
            self.coordinator.tick(&self.tracked).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_ball_change_suspends_then_settles() {
        let h = harness();
        h.store.upsert_match(&h.tracked).await.unwrap();
        let account = h.store.get_or_create_account("alice").await.unwrap();
        h.store.deposit(account.id, 1_000.0).await.unwrap();

        // Seed position at 4.2 and let the window build.
        h.advance(4, 2, 40, 0).await;
        h.coordinator.tick(&h.tracked).await.unwrap();
        assert!(!h.registry.active_for_match("m1").is_empty());

        // Bet on the next delivery's market (total 27 = 4.3 is inside the
        // gap and closed, so wager on total 29 = 4.5).
        let market = h.registry.ensure_ball_market("m1", 4, 5, 120);
        let PlacementOutcome::Placed(_) = h
            .store
            .place_instance_bet(account.id, "m1", &market.id, "4 Runs (Boundary)", 100.0, 450.0)
            .await
            .unwrap()
        else {
            panic!("placement failed")
        };

        // Three boundary deliveries carry position past 4.5.
        h.advance(4, 3, 44, 0).await;
        h.advance(4, 4, 48, 0).await;
        h.advance(4, 5, 52, 0).await;
        // The market for 4.5 is no longer open for betting.
        assert!(h.registry.get(&market.id).unwrap().status != MarketStatus::Open);

        // The delivery at 4.5 lands (another boundary): settle on a later tick.
        h.advance(5, 0, 56, 0).await;
        h.coordinator.tick(&h.tracked).await.unwrap();

        assert_eq!(
            h.registry.get(&market.id).unwrap().status,
            MarketStatus::Settled
        );
        // Winner paid stake + profit.
        let balance = h.store.account(account.id).await.unwrap().balance;
        assert_eq!(balance, 1_000.0 - 100.0 + 550.0);
        let open = h.store.open_instance_bets(&market.id).await.unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn test_window_never_contains_past_markets() {
        let h = harness();
        h.store.upsert_match(&h.tracked).await.unwrap();

        h.advance(2, 0, 20, 0).await;
        h.coordinator.tick(&h.tracked).await.unwrap();

        let gap = h.registry.ball_gap();
        for market in h.registry.active_for_match("m1") {
            if market.instance_type == InstanceType::NextBall {
                assert!(
                    market.ball_total().unwrap() >= crate::overs::ball_total(2, 0) + gap,
                    "market {} is inside the gap",
                    market.event_reference
                );
            }
        }
    }

    #[tokio::test]
    async fn test_feed_hiccup_skips_tick_without_state_loss() {
        let h = harness();
        h.store.upsert_match(&h.tracked).await.unwrap();
        h.advance(3, 1, 30, 0).await;
        h.coordinator.tick(&h.tracked).await.unwrap();
        let before = h.registry.active_for_match("m1").len();
        assert!(before > 0);

        // Feed fails: tick proceeds on cached/no data, markets untouched.
        h.feed.fail_match("ext-m1");
        h.coordinator.tick(&h.tracked).await.unwrap();
        assert_eq!(h.registry.active_for_match("m1").len(), before);
    }

    #[tokio::test]
    async fn test_critical_moment_holds_markets_until_play_resumes() {
        let h = harness();
        h.store.upsert_match(&h.tracked).await.unwrap();

        h.advance(10, 1, 80, 0).await;
        h.coordinator.tick(&h.tracked).await.unwrap();
        assert!(h
            .registry
            .active_for_match("m1")
            .iter()
            .any(|m| m.status == MarketStatus::Open));

        // A wicket falls: everything suspends and stays suspended across
        // quiet ticks while the moment is still fresh.
        h.advance(10, 2, 80, 1).await;
        h.coordinator.tick(&h.tracked).await.unwrap();
        let markets = h.registry.active_for_match("m1");
        assert!(!markets.is_empty());
        assert!(markets.iter().all(|m| m.status == MarketStatus::Suspended));

        // Play resumes with an ordinary delivery: trading reopens.
        h.advance(10, 3, 81, 1).await;
        assert!(h
            .registry
            .active_for_match("m1")
            .iter()
            .any(|m| m.status == MarketStatus::Open));
    }

    #[tokio::test]
    async fn test_late_extra_ball_does_not_void_decided_market() {
        let h = harness_with_delay(100);
        h.store.upsert_match(&h.tracked).await.unwrap();
        let account = h.store.get_or_create_account("carol").await.unwrap();
        h.store.deposit(account.id, 1_000.0).await.unwrap();

        h.advance(4, 2, 40, 0).await;
        h.coordinator.tick(&h.tracked).await.unwrap();
        let market = h.registry.ensure_ball_market("m1", 4, 5, 120);
        let PlacementOutcome::Placed(bet) = h
            .store
            .place_instance_bet(account.id, "m1", &market.id, "Wicket", 100.0, 450.0)
            .await
            .unwrap()
        else {
            panic!("placement failed")
        };

        h.advance(4, 3, 41, 0).await;
        h.advance(4, 4, 42, 0).await;
        h.advance(4, 5, 43, 0).await;
        // The delivery at 4.5 is a wicket; settlement is still on its delay
        // when the next ball already lands.
        h.advance(5, 0, 43, 1).await;
        h.advance(5, 1, 47, 1).await;

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        h.coordinator.tick(&h.tracked).await.unwrap();

        assert_eq!(
            h.registry.get(&market.id).unwrap().status,
            MarketStatus::Settled
        );
        // The wicket backer wins outright, not a void refund.
        let balance = h.store.account(account.id).await.unwrap().balance;
        assert_eq!(balance, 1_000.0 + bet.potential_profit);
    }

    #[tokio::test]
    async fn test_innings_ending_wicket_settles_recorded_market() {
        let h = harness_with_delay(60_000);
        h.store.upsert_match(&h.tracked).await.unwrap();
        let account = h.store.get_or_create_account("dave").await.unwrap();
        h.store.deposit(account.id, 1_000.0).await.unwrap();

        h.advance(4, 2, 40, 0).await;
        h.coordinator.tick(&h.tracked).await.unwrap();
        let market = h.registry.ensure_ball_market("m1", 4, 5, 120);
        let PlacementOutcome::Placed(bet) = h
            .store
            .place_instance_bet(account.id, "m1", &market.id, "Wicket", 100.0, 450.0)
            .await
            .unwrap()
        else {
            panic!("placement failed")
        };

        h.advance(4, 3, 41, 0).await;
        h.advance(4, 4, 42, 0).await;
        h.advance(4, 5, 43, 0).await;
        // The innings ends on the wicket at 4.5.
        h.advance(5, 0, 43, 1).await;
        h.feed.push_ball_by_ball(
            "ext-m1",
            BallByBallSnapshot {
                inning: 2,
                over: 0,
                ball: 0,
                runs: 0,
                wickets: 0,
                finished: false,
            },
        );
        h.cache.poll(std::slice::from_ref(&h.tracked)).await;
        h.coordinator.tick(&h.tracked).await.unwrap();

        // The decided market pays out instead of refunding at the boundary.
        assert_eq!(
            h.registry.get(&market.id).unwrap().status,
            MarketStatus::Settled
        );
        let balance = h.store.account(account.id).await.unwrap().balance;
        assert_eq!(balance, 1_000.0 + bet.potential_profit);
    }

    #[tokio::test]
    async fn test_match_finish_voids_open_instance_bets() {
        let h = harness();
        h.store.upsert_match(&h.tracked).await.unwrap();
        let account = h.store.get_or_create_account("bob").await.unwrap();
        h.store.deposit(account.id, 500.0).await.unwrap();

        h.advance(10, 0, 90, 2).await;
        h.coordinator.tick(&h.tracked).await.unwrap();
        let market = h.registry.ensure_ball_market("m1", 12, 0, 300);
        let PlacementOutcome::Placed(_) = h
            .store
            .place_instance_bet(account.id, "m1", &market.id, "Wicket", 200.0, 2_000.0)
            .await
            .unwrap()
        else {
            panic!("placement failed")
        };

        h.feed.push_ball_by_ball(
            "ext-m1",
            BallByBallSnapshot {
                inning: 1,
                over: 10,
                ball: 1,
                runs: 91,
                wickets: 2,
                finished: true,
            },
        );
        h.cache.poll(std::slice::from_ref(&h.tracked)).await;
        h.coordinator.tick(&h.tracked).await.unwrap();

        // Market settled (void), stake returned.
        assert_eq!(
            h.registry.get(&market.id).unwrap().status,
            MarketStatus::Settled
        );
        assert_eq!(h.store.account(account.id).await.unwrap().balance, 500.0);
        let bets = h.store.open_instance_bets(&market.id).await.unwrap();
        assert!(bets.is_empty());
    }
}
