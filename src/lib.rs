pub mod api;
pub mod config;
pub mod events;
pub mod feed;
pub mod markets;
pub mod models;
pub mod overs;
pub mod settlement;
pub mod state;
pub mod store;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::events::EventPublisher;
use crate::feed::{LiveScoreCache, ScoreFeed};
use crate::markets::{BettingService, MarketRegistry, MatchLifecycleCoordinator};
use crate::settlement::{InstanceSettlement, OutrightSettlement};
use crate::state::MatchStateReconciler;
use crate::store::Store;

/// Shared application state, cloned into every handler and polling loop.
#[derive(Clone)]
pub struct AppState {
    pub config: EngineConfig,
    pub store: Arc<Store>,
    pub cache: Arc<LiveScoreCache>,
    pub reconciler: Arc<MatchStateReconciler>,
    pub registry: Arc<MarketRegistry>,
    pub coordinator: Arc<MatchLifecycleCoordinator>,
    pub outright: Arc<OutrightSettlement>,
    pub betting: Arc<BettingService>,
    pub publisher: EventPublisher,
}

impl AppState {
    pub fn new(config: EngineConfig, store: Arc<Store>, feed: Arc<dyn ScoreFeed>) -> Self {
        let publisher = EventPublisher::new(1000);
        let cache = Arc::new(LiveScoreCache::new(feed.clone(), &config));
        let reconciler = Arc::new(MatchStateReconciler::new(
            feed.clone(),
            cache.clone(),
            &config,
        ));
        let registry = Arc::new(MarketRegistry::new(&config));
        let settlement = Arc::new(InstanceSettlement::new(store.clone(), publisher.clone()));
        let coordinator = Arc::new(MatchLifecycleCoordinator::new(
            config.clone(),
            registry.clone(),
            reconciler.clone(),
            settlement,
            store.clone(),
            publisher.clone(),
        ));
        let outright = Arc::new(OutrightSettlement::new(
            store.clone(),
            feed,
            publisher.clone(),
        ));
        let betting = Arc::new(BettingService::new(
            store.clone(),
            registry.clone(),
            publisher.clone(),
            &config,
        ));
        Self {
            config,
            store,
            cache,
            reconciler,
            registry,
            coordinator,
            outright,
            betting,
            publisher,
        }
    }
}
