//! Micro-market settlement: a CLOSED instance market plus a winning-outcome
//! label becomes exactly-once, all-or-nothing balance mutations.
//!
//! Each bet settles in its own store transaction; one bet's failure never
//! touches its siblings. Re-invoking settlement on an already-SETTLED
//! market mutates nothing.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::EventPublisher;
use crate::markets::registry::MarketRegistry;
use crate::models::{BetStatus, MarketStatus, ServerEvent};
use crate::store::Store;

#[derive(Debug, Default, Clone, Copy)]
pub struct SettleSummary {
    pub bets_settled: usize,
    pub winners: usize,
    pub total_paid: f64,
}

pub struct InstanceSettlement {
    store: Arc<Store>,
    publisher: EventPublisher,
}

impl InstanceSettlement {
    pub fn new(store: Arc<Store>, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    /// Intentionally loose: outcome labels are free text, so a recorded
    /// outcome matches the winner by case-insensitive substring either way.
    pub fn outcome_matches(recorded: &str, winning: &str) -> bool {
        let recorded = recorded.trim().to_lowercase();
        let winning = winning.trim().to_lowercase();
        !recorded.is_empty()
            && !winning.is_empty()
            && (recorded.contains(&winning) || winning.contains(&recorded))
    }

    /// Settle every open bet on the market against `winning_label`, then
    /// stamp the market SETTLED.
    pub async fn settle_market(
        &self,
        registry: &MarketRegistry,
        market_id: &str,
        winning_label: &str,
    ) -> Result<SettleSummary> {
        let Some(market) = registry.get(market_id) else {
            warn!("settlement requested for unknown market {}", market_id);
            return Ok(SettleSummary::default());
        };
        // Exactly-once: a settled market is a no-op for any later caller.
        if market.status == MarketStatus::Settled {
            return Ok(SettleSummary::default());
        }
        if market.status.is_active() {
            registry.transition(market_id, MarketStatus::Closed)?;
        }

        let bets = self.store.open_instance_bets(market_id).await?;
        let mut summary = SettleSummary::default();

        for bet in &bets {
            let won = Self::outcome_matches(&bet.outcome_name, winning_label);
            let (status, payout) = if won {
                (BetStatus::Won, bet.stake + bet.potential_profit)
            } else {
                (BetStatus::Lost, 0.0)
            };
            match self
                .store
                .settle_instance_bet(bet.id, status, payout, Some(winning_label))
                .await
            {
                Ok(Some((user_id, balance))) => {
                    summary.bets_settled += 1;
                    if won {
                        summary.winners += 1;
                        summary.total_paid += payout;
                    }
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
                Ok(None) => {
                    // Raced with another settlement of this bet; skip.
                }
                Err(e) => {
                    warn!("failed to settle bet {} on {}: {:#}", bet.id, market_id, e);
                }
            }
        }

        registry.mark_settled(market_id)?;
        self.publisher.publish_to_match(
            &market.match_id,
            ServerEvent::MarketSettled {
                match_id: market.match_id.clone(),
                market_id: market_id.to_string(),
                winning_outcome: winning_label.to_string(),
            },
        );
        info!(
            "💰 settled market {} [{}]: {} bets, {} winners, {:.2} paid",
            market_id, winning_label, summary.bets_settled, summary.winners, summary.total_paid
        );
        Ok(summary)
    }

    /// Void a market whose outcome is unknowable (abandoned innings, missed
    /// deliveries): every open bet refunds its stake.
    pub async fn void_market(
        &self,
        registry: &MarketRegistry,
        market_id: &str,
    ) -> Result<SettleSummary> {
        let Some(market) = registry.get(market_id) else {
            return Ok(SettleSummary::default());
        };
        if market.status == MarketStatus::Settled {
            return Ok(SettleSummary::default());
        }
        if market.status.is_active() {
            registry.transition(market_id, MarketStatus::Closed)?;
        }

        let bets = self.store.open_instance_bets(market_id).await?;
        let mut summary = SettleSummary::default();
        for bet in &bets {
            match self
                .store
                .settle_instance_bet(bet.id, BetStatus::Void, bet.stake, None)
                .await
            {
                Ok(Some((user_id, balance))) => {
                    summary.bets_settled += 1;
                    summary.total_paid += bet.stake;
                    self.publisher.publish_to_user(
                        user_id,
                        ServerEvent::BetSettled {
                            user_id,
                            bet_id: bet.id,
                            status: BetStatus::Void,
                            payout: bet.stake,
                        },
                    );
                    self.publisher
                        .publish_to_user(user_id, ServerEvent::WalletUpdate { user_id, balance });
                }
                Ok(None) => {}
                Err(e) => warn!("failed to void bet {} on {}: {:#}", bet.id, market_id, e),
            }
        }

        registry.mark_settled(market_id)?;
        info!(
            "↩️  voided market {}: {} stakes returned",
            market_id, summary.bets_settled
        );
        Ok(summary)
    }
}
