//! Placement guard for instance-market wagers.
//!
//! Every check runs against the in-memory registry before the store is
//! touched; the atomic balance check lives inside the store transaction.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::events::EventPublisher;
use crate::markets::registry::MarketRegistry;
use crate::models::{InstanceBet, MarketStatus, ServerEvent};
use crate::store::{PlacementOutcome, Store};

#[derive(Debug)]
pub enum PlaceResult {
    Placed(InstanceBet),
    /// Market missing, not OPEN, or inside the pre-close margin.
    MarketUnavailable(String),
    UnknownOutcome,
    InvalidStake,
    InsufficientFunds,
}

pub struct BettingService {
    store: Arc<Store>,
    registry: Arc<MarketRegistry>,
    publisher: EventPublisher,
    close_margin: Duration,
}

impl BettingService {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<MarketRegistry>,
        publisher: EventPublisher,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            publisher,
            close_margin: Duration::seconds(config.bet_margin_secs as i64),
        }
    }

    pub async fn place(
        &self,
        user_id: i64,
        market_id: &str,
        outcome_name: &str,
        stake: f64,
    ) -> Result<PlaceResult> {
        if !(stake.is_finite() && stake > 0.0) {
            return Ok(PlaceResult::InvalidStake);
        }

        let Some(market) = self.registry.get(market_id) else {
            return Ok(PlaceResult::MarketUnavailable("market not found".to_string()));
        };
        if market.status != MarketStatus::Open {
            return Ok(PlaceResult::MarketUnavailable(format!(
                "market is {}",
                market.status.as_str()
            )));
        }
        if Utc::now() + self.close_margin >= market.close_time {
            return Ok(PlaceResult::MarketUnavailable(
                "market is about to close".to_string(),
            ));
        }

        let Some(outcome) = market
            .outcomes
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(outcome_name))
        else {
            return Ok(PlaceResult::UnknownOutcome);
        };
        let potential_profit = stake * (outcome.odds - 1.0);

        match self
            .store
            .place_instance_bet(
                user_id,
                &market.match_id,
                market_id,
                &outcome.name,
                stake,
                potential_profit,
            )
            .await?
        {
            PlacementOutcome::Placed(bet) => {
                let account = self.store.account(user_id).await?;
                info!(
                    "🎯 Bet {}: {} staked {:.2} on '{}' in {}",
                    bet.id, user_id, stake, outcome.name, market.name
                );
                self.publisher.publish_to_user(
                    user_id,
                    ServerEvent::WalletUpdate {
                        user_id,
                        balance: account.balance,
                    },
                );
                Ok(PlaceResult::Placed(bet))
            }
            PlacementOutcome::InsufficientFunds => Ok(PlaceResult::InsufficientFunds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (BettingService, Arc<Store>, Arc<MarketRegistry>) {
        let config = EngineConfig::default();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = Arc::new(MarketRegistry::new(&config));
        let svc = BettingService::new(
            store.clone(),
            registry.clone(),
            EventPublisher::new(16),
            &config,
        );
        (svc, store, registry)
    }

    #[tokio::test]
    async fn test_rejects_closed_and_imminent_markets() {
        let (svc, store, registry) = service();
        let account = store.get_or_create_account("carol").await.unwrap();
        store.deposit(account.id, 100.0).await.unwrap();

        // Closing within the margin window.
        let imminent = registry.ensure_ball_market("m1", 7, 2, 5);
        let result = svc
            .place(account.id, &imminent.id, "Wicket", 10.0)
            .await
            .unwrap();
        assert!(matches!(result, PlaceResult::MarketUnavailable(_)));

        let market = registry.ensure_ball_market("m1", 8, 0, 600);
        registry
            .transition(&market.id, MarketStatus::Suspended)
            .unwrap();
        let result = svc
            .place(account.id, &market.id, "Wicket", 10.0)
            .await
            .unwrap();
        assert!(matches!(result, PlaceResult::MarketUnavailable(_)));
        assert_eq!(store.account(account.id).await.unwrap().balance, 100.0);
    }

    #[tokio::test]
    async fn test_profit_derived_from_market_odds() {
        let (svc, store, registry) = service();
        let account = store.get_or_create_account("dave").await.unwrap();
        store.deposit(account.id, 100.0).await.unwrap();

        let market = registry.ensure_ball_market("m1", 9, 3, 600);
        let odds = market
            .outcomes
            .iter()
            .find(|o| o.name == "Wicket")
            .unwrap()
            .odds;
        let PlaceResult::Placed(bet) = svc
            .place(account.id, &market.id, "wicket", 20.0)
            .await
            .unwrap()
        else {
            panic!("expected placement")
        };
        assert!((bet.potential_profit - 20.0 * (odds - 1.0)).abs() < 1e-9);
        assert_eq!(store.account(account.id).await.unwrap().balance, 80.0);
    }

    #[tokio::test]
    async fn test_invalid_stake_and_unknown_outcome() {
        let (svc, store, registry) = service();
        let account = store.get_or_create_account("erin").await.unwrap();
        store.deposit(account.id, 50.0).await.unwrap();
        let market = registry.ensure_ball_market("m1", 10, 0, 600);

        assert!(matches!(
            svc.place(account.id, &market.id, "Wicket", 0.0).await.unwrap(),
            PlaceResult::InvalidStake
        ));
        assert!(matches!(
            svc.place(account.id, &market.id, "Hat Trick", 10.0)
                .await
                .unwrap(),
            PlaceResult::UnknownOutcome
        ));
        assert!(matches!(
            svc.place(account.id, &market.id, "Wicket", 500.0)
                .await
                .unwrap(),
            PlaceResult::InsufficientFunds
        ));
        assert_eq!(store.account(account.id).await.unwrap().balance, 50.0);
    }
}
