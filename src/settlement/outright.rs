//! Match-winner (back/lay) settlement, independent of the micro-market
//! machinery. A slow sweep walks every match with open bets, asks the feed
//! for a final result, and settles each bet in its own transaction. This
//! path never touches instance markets; those belong to the lifecycle
//! coordinator.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::EventPublisher;
use crate::feed::ScoreFeed;
use crate::models::{Bet, BetStatus, BetType, ServerEvent};
use crate::settlement::results::{
    is_draw_selection, parse_completed_score, parse_cricket_result, teams_match, MatchResult,
};
use crate::store::Store;

/// Pure outcome decision for one bet against a final result.
pub fn decide_bet(bet: &Bet, result: &MatchResult) -> (BetStatus, f64) {
    if result.is_void {
        // Abandoned / no result: return what placement reserved.
        let refund = match bet.bet_type {
            BetType::Back => bet.stake,
            BetType::Lay => bet.stake + bet.liability(),
        };
        return (BetStatus::Void, refund);
    }

    let selection_wins = if is_draw_selection(&bet.runner_name) {
        result.is_draw
    } else {
        !result.is_draw
            && result
                .winner
                .as_deref()
                .map(|w| teams_match(&bet.runner_name, w))
                .unwrap_or(false)
    };

    let won = match bet.bet_type {
        BetType::Back => selection_wins,
        BetType::Lay => !selection_wins,
    };
    if won {
        let payout = match bet.bet_type {
            BetType::Back => bet.stake + bet.potential_profit,
            BetType::Lay => bet.stake + bet.liability(),
        };
        (BetStatus::Won, payout)
    } else {
        (BetStatus::Lost, 0.0)
    }
}

pub struct OutrightSettlement {
    store: Arc<Store>,
    feed: Arc<dyn ScoreFeed>,
    publisher: EventPublisher,
}

impl OutrightSettlement {
    pub fn new(store: Arc<Store>, feed: Arc<dyn ScoreFeed>, publisher: EventPublisher) -> Self {
        Self {
            store,
            feed,
            publisher,
        }
    }

    /// One sweep over all matches with open match-winner bets. A failure on
    /// one match is logged and the sweep continues.
    pub async fn sweep(&self) -> Result<usize> {
        let matches = self.store.matches_with_open_bets().await?;
        let mut settled = 0;
        for m in matches {
            match self.resolve_match(&m.external_id, &m.sport).await {
                Ok(Some(result)) => {
                    settled += self.settle_match_bets(&m.match_id, &result).await?;
                    // The match stays tracked: the lifecycle coordinator owns
                    // the FINISHED transition, and untracking here before it
                    // observes the finish would strand open instance markets.
                }
                Ok(None) => {
                    debug!("match {} not decided yet", m.match_id);
                }
                Err(e) => {
                    warn!("result fetch failed for {}: {:#}", m.match_id, e);
                }
            }
        }
        Ok(settled)
    }

    async fn resolve_match(&self, external_id: &str, sport: &str) -> Result<Option<MatchResult>> {
        if sport.eq_ignore_ascii_case("cricket") {
            let Some(text) = self.feed.match_result(external_id).await? else {
                return Ok(None);
            };
            Ok(parse_cricket_result(&text))
        } else {
            let Some(score) = self.feed.completed_score(external_id).await? else {
                return Ok(None);
            };
            Ok(Some(parse_completed_score(&score)))
        }
    }

    /// Settle every open bet on a decided match, one transaction per bet.
    pub async fn settle_match_bets(&self, match_id: &str, result: &MatchResult) -> Result<usize> {
        let bets = self.store.open_bets_for_match(match_id).await?;
        let mut settled = 0;
        for bet in &bets {
            let (status, payout) = decide_bet(bet, result);
            match self.store.settle_bet(bet.id, status, payout).await {
                Ok(Some((user_id, balance))) => {
                    settled += 1;
                    self.publisher.publish_to_user(
                        user_id,
                        ServerEvent::BetSettled {
                            user_id,
                            bet_id: bet.id,
                            status,
                            payout,
                        },
                    );
                    self.publisher
                        .publish_to_user(user_id, ServerEvent::WalletUpdate { user_id, balance });
                }
                Ok(None) => {}
                Err(e) => {
                    // One bet's failure never aborts the batch.
                    warn!("failed to settle bet {} on {}: {:#}", bet.id, match_id, e);
                }
            }
        }
        if settled > 0 {
            info!(
                "🏆 settled {} match-winner bets for {} (winner: {:?})",
                settled, match_id, result.winner
            );
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::ScriptedFeed;
    use crate::models::{MatchStatus, MatchType, TrackedMatch};
    use crate::store::PlacementOutcome;
    use chrono::Utc;

    fn back_bet(runner: &str, odds: f64, stake: f64) -> Bet {
        Bet {
            id: 1,
            user_id: 1,
            match_id: "m1".to_string(),
            market_id: "mw1".to_string(),
            runner_id: "r1".to_string(),
            runner_name: runner.to_string(),
            bet_type: BetType::Back,
            odds,
            stake,
            potential_profit: stake * (odds - 1.0),
            status: BetStatus::Open,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    fn lay_bet(runner: &str, odds: f64, stake: f64) -> Bet {
        Bet {
            bet_type: BetType::Lay,
            potential_profit: stake,
            ..back_bet(runner, odds, stake)
        }
    }

    #[test]
    fn test_back_bet_wins_on_fuzzy_winner() {
        // stake 100 at 2.5 on Mumbai Indians; winner text includes noise.
        let bet = back_bet("Mumbai Indians", 2.5, 100.0);
        let result = parse_cricket_result("Mumbai Indians Win by 6 wkts").unwrap();
        let (status, payout) = decide_bet(&bet, &result);
        assert_eq!(status, BetStatus::Won);
        assert_eq!(payout, 250.0);
    }

    #[test]
    fn test_back_bet_loses_when_other_team_wins() {
        let bet = back_bet("Chennai Super Kings", 3.0, 100.0);
        let result = MatchResult::winner("Mumbai Indians");
        assert_eq!(decide_bet(&bet, &result), (BetStatus::Lost, 0.0));
    }

    #[test]
    fn test_lay_bet_wins_complement() {
        let bet = lay_bet("Mumbai Indians", 2.5, 100.0);
        // Laying Mumbai, Chennai wins: layer keeps stake + liability back.
        let result = MatchResult::winner("Chennai Super Kings");
        let (status, payout) = decide_bet(&bet, &result);
        assert_eq!(status, BetStatus::Won);
        assert_eq!(payout, 100.0 + 150.0);

        // Mumbai wins: layer pays out (nothing returned).
        let result = MatchResult::winner("Mumbai Indians");
        assert_eq!(decide_bet(&bet, &result), (BetStatus::Lost, 0.0));
    }

    #[test]
    fn test_draw_selection() {
        let bet = back_bet("Draw", 4.0, 50.0);
        assert_eq!(decide_bet(&bet, &MatchResult::draw()).0, BetStatus::Won);
        assert_eq!(
            decide_bet(&bet, &MatchResult::winner("India")).0,
            BetStatus::Lost
        );
        // A team back on a drawn match loses.
        let team = back_bet("India", 2.0, 50.0);
        assert_eq!(decide_bet(&team, &MatchResult::draw()).0, BetStatus::Lost);
    }

    #[test]
    fn test_void_refunds() {
        let back = back_bet("India", 2.0, 100.0);
        assert_eq!(decide_bet(&back, &MatchResult::void()), (BetStatus::Void, 100.0));
        let lay = lay_bet("India", 3.0, 100.0);
        // Lay liability 200, refund stake + liability.
        assert_eq!(decide_bet(&lay, &MatchResult::void()), (BetStatus::Void, 300.0));
    }

    #[tokio::test]
    async fn test_sweep_settles_decided_matches_only() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let feed = Arc::new(ScriptedFeed::default());
        let outright =
            OutrightSettlement::new(store.clone(), feed.clone(), EventPublisher::new(16));

        let account = store.get_or_create_account("alice").await.unwrap();
        store.deposit(account.id, 1_000.0).await.unwrap();

        for (match_id, external_id) in [("m1", "ext-1"), ("m2", "ext-2")] {
            store
                .upsert_match(&TrackedMatch {
                    match_id: match_id.to_string(),
                    external_id: external_id.to_string(),
                    sport: "cricket".to_string(),
                    home_team: "Mumbai Indians".to_string(),
                    away_team: "Chennai Super Kings".to_string(),
                    match_type: MatchType::T20,
                    status: MatchStatus::Live,
                })
                .await
                .unwrap();
            let PlacementOutcome::Placed(_) = store
                .place_bet(
                    account.id,
                    match_id,
                    "mw",
                    "r1",
                    "Mumbai Indians",
                    BetType::Back,
                    2.5,
                    100.0,
                )
                .await
                .unwrap()
            else {
                panic!("placement failed")
            };
        }

        // m1 decided, m2 still live.
        feed.set_result("ext-1", "Mumbai Indians won by 6 wickets");

        let settled = outright.sweep().await.unwrap();
        assert_eq!(settled, 1);

        // 1000 - 200 staked + 250 payout
        assert_eq!(store.account(account.id).await.unwrap().balance, 1_050.0);
        assert_eq!(store.open_bets_for_match("m1").await.unwrap().len(), 0);
        assert_eq!(store.open_bets_for_match("m2").await.unwrap().len(), 1);

        // Re-sweeping is a no-op for m1.
        feed.set_result("ext-2", "No result");
        let settled = outright.sweep().await.unwrap();
        assert_eq!(settled, 1);
        // m2 voided: stake returned.
        assert_eq!(store.account(account.id).await.unwrap().balance, 1_150.0);
    }

    #[tokio::test]
    async fn test_sweep_leaves_match_tracked_for_lifecycle() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let feed = Arc::new(ScriptedFeed::default());
        let outright =
            OutrightSettlement::new(store.clone(), feed.clone(), EventPublisher::new(16));

        let account = store.get_or_create_account("bob").await.unwrap();
        store.deposit(account.id, 500.0).await.unwrap();
        store
            .upsert_match(&TrackedMatch {
                match_id: "m1".to_string(),
                external_id: "ext-1".to_string(),
                sport: "cricket".to_string(),
                home_team: "Mumbai Indians".to_string(),
                away_team: "Chennai Super Kings".to_string(),
                match_type: MatchType::T20,
                status: MatchStatus::Live,
            })
            .await
            .unwrap();

        // An open instance bet still awaiting the coordinator's
        // end-of-match pass.
        let PlacementOutcome::Placed(_) = store
            .place_instance_bet(account.id, "m1", "mk1", "Wicket", 100.0, 450.0)
            .await
            .unwrap()
        else {
            panic!("placement failed")
        };
        let PlacementOutcome::Placed(_) = store
            .place_bet(
                account.id,
                "m1",
                "mw",
                "r1",
                "Mumbai Indians",
                BetType::Back,
                2.0,
                50.0,
            )
            .await
            .unwrap()
        else {
            panic!("placement failed")
        };

        feed.set_result("ext-1", "Mumbai Indians won by 6 wickets");
        assert_eq!(outright.sweep().await.unwrap(), 1);

        // Match-winner bet settled, but the match must still be tracked so
        // the lifecycle coordinator can observe the finish and clear the
        // instance bet.
        assert!(store.open_bets_for_match("m1").await.unwrap().is_empty());
        assert_eq!(store.open_instance_bets("mk1").await.unwrap().len(), 1);
        let tracked = store.tracked_matches().await.unwrap();
        assert!(tracked.iter().any(|m| m.match_id == "m1"));
    }
}
