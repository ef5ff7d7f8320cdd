//! In-memory market factory and store.
//!
//! Creation is idempotent on the logical key (match, type, over, ball):
//! re-requesting an equivalent market while one is OPEN or SUSPENDED
//! returns the existing one unchanged. Status transitions are monotonic;
//! the registry is the only place that mutates them.

use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::markets::odds;
use crate::models::{InstanceMarket, InstanceType, MarketStatus, MatchState};
use crate::overs;

/// Rough wall-clock estimate of one delivery, used for close times on
/// forward-window markets. Markets are actually closed by ball
/// advancement; the close time only drives the placement-margin guard.
const SECS_PER_BALL: i64 = 30;

/// Game situations in which every market should be suspended (they can
/// reopen), as opposed to closed (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticalMoment {
    WicketFell,
    FinalOverEnding,
    PowerplayEnding,
}

pub struct MarketRegistry {
    markets: RwLock<HashMap<String, InstanceMarket>>,
    ball_gap: u32,
}

impl MarketRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            markets: RwLock::new(HashMap::new()),
            ball_gap: config.ball_gap,
        }
    }

    pub fn ball_gap(&self) -> u32 {
        self.ball_gap
    }

    pub fn get(&self, market_id: &str) -> Option<InstanceMarket> {
        self.markets.read().get(market_id).cloned()
    }

    pub fn active_for_match(&self, match_id: &str) -> Vec<InstanceMarket> {
        let mut out: Vec<InstanceMarket> = self
            .markets
            .read()
            .values()
            .filter(|m| m.match_id == match_id && m.status.is_active())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.ball_total().cmp(&b.ball_total()).then(a.id.cmp(&b.id)));
        out
    }

    pub fn all_active(&self) -> Vec<InstanceMarket> {
        self.markets
            .read()
            .values()
            .filter(|m| m.status.is_active())
            .cloned()
            .collect()
    }

    fn find_active(
        &self,
        match_id: &str,
        instance_type: InstanceType,
        over: Option<u32>,
        ball: Option<u32>,
        reference: Option<&str>,
    ) -> Option<InstanceMarket> {
        self.markets
            .read()
            .values()
            .find(|m| {
                m.match_id == match_id
                    && m.instance_type == instance_type
                    && m.status.is_active()
                    && m.over_number == over
                    && m.ball_number == ball
                    && reference.map(|r| m.event_reference == r).unwrap_or(true)
            })
            .cloned()
    }

    fn insert_new(
        &self,
        match_id: &str,
        instance_type: InstanceType,
        name: String,
        description: String,
        event_reference: String,
        over: Option<u32>,
        ball: Option<u32>,
        close_in_secs: i64,
    ) -> InstanceMarket {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let market = InstanceMarket {
            id: id.clone(),
            match_id: match_id.to_string(),
            instance_type,
            name,
            description,
            open_time: now,
            close_time: now + ChronoDuration::seconds(close_in_secs.max(1)),
            // PENDING exists on the wire but markets open immediately.
            status: MarketStatus::Open,
            event_reference,
            over_number: over,
            ball_number: ball,
            outcomes: odds::build_outcomes(&id, instance_type),
        };
        self.markets.write().insert(id, market.clone());
        debug!(
            "🆕 market {} [{}] {}",
            market.id,
            market.instance_type.as_str(),
            market.event_reference
        );
        market
    }

    /// Idempotent: an OPEN/SUSPENDED market on the same delivery is
    /// returned unchanged.
    pub fn ensure_ball_market(
        &self,
        match_id: &str,
        over: u32,
        ball: u32,
        close_in_secs: i64,
    ) -> InstanceMarket {
        if let Some(existing) =
            self.find_active(match_id, InstanceType::NextBall, Some(over), Some(ball), None)
        {
            return existing;
        }
        let position = overs::format_position(over, ball);
        self.insert_new(
            match_id,
            InstanceType::NextBall,
            format!("Next Ball {}", position),
            format!("Outcome of delivery {}", position),
            format!("ball {}", position),
            Some(over),
            Some(ball),
            close_in_secs,
        )
    }

    pub fn ensure_over_market(&self, match_id: &str, over: u32, close_in_secs: i64) -> InstanceMarket {
        if let Some(existing) =
            self.find_active(match_id, InstanceType::NextOver, Some(over), None, None)
        {
            return existing;
        }
        self.insert_new(
            match_id,
            InstanceType::NextOver,
            format!("Over {} Runs", over + 1),
            format!("Runs scored in over {}", over + 1),
            format!("over {}", over),
            Some(over),
            None,
            close_in_secs,
        )
    }

    pub fn ensure_session_market(
        &self,
        match_id: &str,
        inning: u32,
        close_in_secs: i64,
    ) -> InstanceMarket {
        let reference = format!("innings {}", inning);
        if let Some(existing) =
            self.find_active(match_id, InstanceType::Session, None, None, Some(&reference))
        {
            return existing;
        }
        self.insert_new(
            match_id,
            InstanceType::Session,
            format!("Innings {} Total", inning),
            format!("Total runs in innings {}", inning),
            reference,
            None,
            None,
            close_in_secs,
        )
    }

    pub fn ensure_player_market(
        &self,
        match_id: &str,
        player_name: &str,
        close_in_secs: i64,
    ) -> InstanceMarket {
        if let Some(existing) = self.find_active(
            match_id,
            InstanceType::PlayerPerformance,
            None,
            None,
            Some(player_name),
        ) {
            return existing;
        }
        self.insert_new(
            match_id,
            InstanceType::PlayerPerformance,
            format!("{} Runs", player_name),
            format!("Runs scored by {}", player_name),
            player_name.to_string(),
            None,
            None,
            close_in_secs,
        )
    }

    /// Maintain the rolling 6-ball lookahead: markets for
    /// `T + gap ..= T + gap + 5`, capped at the match's over limit.
    /// Returns the number of markets newly created.
    pub fn ensure_ball_window(&self, match_id: &str, current_total: u32, max_over: u32) -> usize {
        let mut created = 0;
        let start = current_total + self.ball_gap;
        for target in start..start + overs::BALLS_PER_OVER {
            let (over, ball) = overs::from_total(target);
            if over >= max_over {
                break;
            }
            let close_in = (target - current_total) as i64 * SECS_PER_BALL;
            let before = self.markets.read().len();
            self.ensure_ball_market(match_id, over, ball, close_in);
            if self.markets.read().len() > before {
                created += 1;
            }
        }
        created
    }

    /// Force-close everything no longer wagerable: ball markets inside the
    /// gap ("no betting on the past or the imminent present") and over
    /// markets whose over has reached its sixth ball or passed. Returns the
    /// closed markets.
    pub fn close_markets_for_past_events(
        &self,
        match_id: &str,
        current_over: u32,
        current_ball: u32,
    ) -> Vec<InstanceMarket> {
        let current_total = overs::ball_total(current_over, current_ball);
        let cutoff = current_total + self.ball_gap;
        let mut closed = Vec::new();
        let mut markets = self.markets.write();
        for market in markets.values_mut() {
            if market.match_id != match_id || !market.status.is_active() {
                continue;
            }
            let close = match market.instance_type {
                InstanceType::NextBall => market
                    .ball_total()
                    .map(|t| t < cutoff)
                    .unwrap_or(false),
                InstanceType::NextOver | InstanceType::CurrentOver => market
                    .over_number
                    .map(|o| current_over > o || (current_over == o && current_ball >= 5))
                    .unwrap_or(false),
                _ => false,
            };
            if close {
                market.status = MarketStatus::Closed;
                closed.push(market.clone());
            }
        }
        if !closed.is_empty() {
            debug!(
                "🔒 closed {} past-event markets for {} at {}",
                closed.len(),
                match_id,
                overs::format_position(current_over, current_ball)
            );
        }
        closed
    }

    /// Suspend every OPEN market for the match. Returns suspended ids.
    pub fn suspend_open_markets(&self, match_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut markets = self.markets.write();
        for market in markets.values_mut() {
            if market.match_id == match_id && market.status == MarketStatus::Open {
                market.status = MarketStatus::Suspended;
                out.push(market.id.clone());
            }
        }
        out
    }

    /// Reopen suspended markets once the critical moment has passed.
    pub fn reopen_suspended(&self, match_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut markets = self.markets.write();
        for market in markets.values_mut() {
            if market.match_id == match_id && market.status == MarketStatus::Suspended {
                market.status = MarketStatus::Open;
                out.push(market.id.clone());
            }
        }
        out
    }

    /// Detect game situations where everything should be suspended rather
    /// than closed: a wicket just fell, the innings is down to its last
    /// ball, or the powerplay's final over is ending.
    pub fn check_critical_moments(&self, state: &MatchState) -> Option<CriticalMoment> {
        if let Some(ref last) = state.last_ball {
            if last.is_wicket && (Utc::now() - last.timestamp) < ChronoDuration::seconds(30) {
                return Some(CriticalMoment::WicketFell);
            }
        }

        let max_over = state.metadata.match_type.max_overs();
        let remaining = overs::ball_total(max_over, 0).saturating_sub(state.ball_total());
        if remaining <= 1 {
            return Some(CriticalMoment::FinalOverEnding);
        }

        // Last over of the powerplay (overs 1-6), final delivery pending.
        if state.current_over == 5 && state.current_ball == 5 {
            return Some(CriticalMoment::PowerplayEnding);
        }

        None
    }

    /// Enforced monotonic status transition.
    pub fn transition(&self, market_id: &str, next: MarketStatus) -> Result<()> {
        let mut markets = self.markets.write();
        let Some(market) = markets.get_mut(market_id) else {
            bail!("market {} not found", market_id);
        };
        if market.status == next {
            return Ok(());
        }
        if !market.status.can_transition_to(next) {
            bail!(
                "illegal market transition {} -> {} for {}",
                market.status.as_str(),
                next.as_str(),
                market_id
            );
        }
        market.status = next;
        Ok(())
    }

    pub fn mark_settled(&self, market_id: &str) -> Result<()> {
        self.transition(market_id, MarketStatus::Settled)
    }

    /// Markets whose referenced event has fully happened (delivery bowled,
    /// over complete) and that still await settlement. Includes markets
    /// already force-closed by the gap rule.
    pub fn settleable_markets(&self, match_id: &str, current_total: u32) -> Vec<InstanceMarket> {
        self.markets
            .read()
            .values()
            .filter(|m| {
                if m.match_id != match_id
                    || !(m.status.is_active() || m.status == MarketStatus::Closed)
                {
                    return false;
                }
                match m.instance_type {
                    InstanceType::NextBall => {
                        m.ball_total().map(|t| t < current_total).unwrap_or(false)
                    }
                    InstanceType::NextOver | InstanceType::CurrentOver => m
                        .over_number
                        .map(|o| overs::ball_total(o + 1, 0) <= current_total)
                        .unwrap_or(false),
                    _ => false,
                }
            })
            .cloned()
            .collect()
    }

    /// Session markets for a completed innings, awaiting settlement.
    pub fn session_markets(&self, match_id: &str, inning: u32) -> Vec<InstanceMarket> {
        let reference = format!("innings {}", inning);
        self.markets
            .read()
            .values()
            .filter(|m| {
                m.match_id == match_id
                    && m.instance_type == InstanceType::Session
                    && m.event_reference == reference
                    && (m.status.is_active() || m.status == MarketStatus::Closed)
            })
            .cloned()
            .collect()
    }

    /// Every non-terminal market for the match (used at match end).
    pub fn open_markets_for_match(&self, match_id: &str) -> Vec<InstanceMarket> {
        self.markets
            .read()
            .values()
            .filter(|m| {
                m.match_id == match_id
                    && (m.status.is_active() || m.status == MarketStatus::Closed)
            })
            .cloned()
            .collect()
    }

    /// Defensive cleanup: drop settled markets that have fallen far behind
    /// the live position so the map does not grow for the whole match.
    pub fn purge_outside_window(&self, match_id: &str, current_total: u32) -> usize {
        let horizon = current_total.saturating_sub(5 * overs::BALLS_PER_OVER);
        let mut markets = self.markets.write();
        let before = markets.len();
        markets.retain(|_, m| {
            if m.match_id != match_id || m.status != MarketStatus::Settled {
                return true;
            }
            m.ball_total().map(|t| t >= horizon).unwrap_or(true)
        });
        let removed = before - markets.len();
        if removed > 0 {
            info!("🧹 purged {} settled markets for {}", removed, match_id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchMetadata, MatchType};

    fn registry() -> MarketRegistry {
        MarketRegistry::new(&EngineConfig::default())
    }

    #[test]
    fn test_idempotent_ball_market_creation() {
        let reg = registry();
        let a = reg.ensure_ball_market("m1", 4, 2, 120);
        let b = reg.ensure_ball_market("m1", 4, 2, 120);
        assert_eq!(a.id, b.id);
        assert_eq!(reg.active_for_match("m1").len(), 1);

        // A different delivery is a different market.
        let c = reg.ensure_ball_market("m1", 4, 3, 150);
        assert_ne!(a.id, c.id);

        // Suspended still counts as existing.
        reg.transition(&a.id, MarketStatus::Suspended).unwrap();
        let d = reg.ensure_ball_market("m1", 4, 2, 120);
        assert_eq!(a.id, d.id);
    }

    #[test]
    fn test_window_generation_matches_gap() {
        let reg = registry();
        // Current position 2.0 (total 12): markets for totals 15..=20.
        let created = reg.ensure_ball_window("m1", 12, 20);
        assert_eq!(created, 6);
        let mut totals: Vec<u32> = reg
            .active_for_match("m1")
            .iter()
            .filter_map(|m| m.ball_total())
            .collect();
        totals.sort_unstable();
        assert_eq!(totals, vec![15, 16, 17, 18, 19, 20]);
        // 15 is over 2 ball 3; 20 is over 3 ball 2.
        assert_eq!(overs::from_total(15), (2, 3));
        assert_eq!(overs::from_total(20), (3, 2));

        // Every generated market is at or beyond current + gap.
        for m in reg.active_for_match("m1") {
            assert!(m.ball_total().unwrap() >= 12 + reg.ball_gap());
        }

        // Re-running creates nothing new.
        assert_eq!(reg.ensure_ball_window("m1", 12, 20), 0);
    }

    #[test]
    fn test_window_capped_at_max_over() {
        let reg = registry();
        // T20, position 19.3 (total 117): window would run past over 20.
        let created = reg.ensure_ball_window("m1", 117, 20);
        assert_eq!(created, 0);
        // Position 18.3 (total 111): targets 114..=119, all inside over 19.
        let created = reg.ensure_ball_window("m1", 111, 20);
        assert_eq!(created, 6);
    }

    #[test]
    fn test_close_past_events() {
        let reg = registry();
        let past = reg.ensure_ball_market("m1", 2, 2, 60); // total 14
        let future = reg.ensure_ball_market("m1", 2, 3, 90); // total 15
        let over_done = reg.ensure_over_market("m1", 1, 60);

        // Position 2.0 (total 12), gap 3: total 14 < 15 closes, 15 stays.
        let closed = reg.close_markets_for_past_events("m1", 2, 0);
        let closed_ids: Vec<&str> = closed.iter().map(|m| m.id.as_str()).collect();
        assert!(closed_ids.contains(&past.id.as_str()));
        assert!(closed_ids.contains(&over_done.id.as_str()));
        assert!(!closed_ids.contains(&future.id.as_str()));
        assert_eq!(reg.get(&past.id).unwrap().status, MarketStatus::Closed);
        assert_eq!(reg.get(&future.id).unwrap().status, MarketStatus::Open);
    }

    #[test]
    fn test_over_market_closes_on_sixth_ball() {
        let reg = registry();
        let m = reg.ensure_over_market("m1", 3, 120);
        assert!(reg.close_markets_for_past_events("m1", 3, 4).is_empty());
        let closed = reg.close_markets_for_past_events("m1", 3, 5);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, m.id);
    }

    #[test]
    fn test_monotonic_transitions() {
        let reg = registry();
        let m = reg.ensure_ball_market("m1", 5, 0, 60);

        reg.transition(&m.id, MarketStatus::Suspended).unwrap();
        reg.transition(&m.id, MarketStatus::Open).unwrap();
        reg.transition(&m.id, MarketStatus::Closed).unwrap();
        // Closed never reopens.
        assert!(reg.transition(&m.id, MarketStatus::Open).is_err());
        reg.mark_settled(&m.id).unwrap();
        // Settled is terminal.
        assert!(reg.transition(&m.id, MarketStatus::Closed).is_err());
        assert!(reg.transition(&m.id, MarketStatus::Open).is_err());
    }

    #[test]
    fn test_settled_not_resettleable() {
        let reg = registry();
        let m = reg.ensure_ball_market("m1", 1, 0, 60); // total 6
        reg.transition(&m.id, MarketStatus::Closed).unwrap();
        assert_eq!(reg.settleable_markets("m1", 7).len(), 1);
        reg.mark_settled(&m.id).unwrap();
        assert!(reg.settleable_markets("m1", 7).is_empty());
    }

    fn live_state(over: u32, ball: u32, wicket: bool) -> MatchState {
        MatchState {
            match_id: "m1".to_string(),
            external_id: "ext".to_string(),
            status: crate::models::MatchStatus::Live,
            current_over: over,
            current_ball: ball,
            total_runs: 100,
            total_wickets: 3,
            current_inning: 1,
            innings: Vec::new(),
            last_ball: wicket.then(|| crate::models::BallEvent {
                runs: 0,
                is_wicket: true,
                is_boundary: false,
                is_six: false,
                is_extra: false,
                timestamp: Utc::now(),
            }),
            last_updated: Utc::now(),
            metadata: MatchMetadata {
                home_team: "A".to_string(),
                away_team: "B".to_string(),
                match_type: MatchType::T20,
                start_time: None,
            },
        }
    }

    #[test]
    fn test_critical_moments() {
        let reg = registry();
        assert_eq!(
            reg.check_critical_moments(&live_state(10, 2, true)),
            Some(CriticalMoment::WicketFell)
        );
        assert_eq!(
            reg.check_critical_moments(&live_state(19, 5, false)),
            Some(CriticalMoment::FinalOverEnding)
        );
        assert_eq!(
            reg.check_critical_moments(&live_state(5, 5, false)),
            Some(CriticalMoment::PowerplayEnding)
        );
        assert_eq!(reg.check_critical_moments(&live_state(10, 2, false)), None);
    }
}
