use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::{collections::HashSet, env, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crickbet_backend::{
    config::EngineConfig,
    feed::CricketApiClient,
    models::MatchStatus,
    store::Store,
    AppState,
};

#[derive(Parser, Debug)]
#[command(name = "crickbet")]
#[command(about = "Live cricket instance-betting engine")]
struct Args {
    /// Path to the SQLite database
    #[arg(long, env = "DB_PATH", default_value = "crickbet.db")]
    db: String,

    /// Listen address for the API server
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();
    let args = Args::parse();

    info!("🏏 CrickBet Engine Starting");

    let config = EngineConfig::from_env();
    let store = Arc::new(Store::new(&args.db).context("Failed to open database")?);
    info!("📊 Database initialized at: {}", args.db);

    let api_key = env::var("CRICKET_API_KEY").unwrap_or_default();
    if api_key.trim().is_empty() {
        warn!("⚠️  CRICKET_API_KEY not set - live score polling will fail");
    }
    let base_url = env::var("CRICKET_API_URL")
        .unwrap_or_else(|_| "https://api.cricapi.com/v1".to_string());
    let feed = Arc::new(CricketApiClient::new(base_url, api_key)?);

    let state = AppState::new(config, store, feed);

    tokio::spawn(score_polling(state.clone()));
    tokio::spawn(lifecycle_polling(state.clone()));
    tokio::spawn(outright_polling(state.clone()));
    tokio::spawn(state_pruning(state.clone()));

    let app = crickbet_backend::api::router(state).layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&args.listen).await?;
    info!("🎯 API server listening on {}", args.listen);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crickbet_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Refresh the live-score cache for every tracked match.
async fn score_polling(state: AppState) {
    info!(
        "📡 Starting score polling every {}ms",
        state.config.score_poll_ms
    );
    let mut ticker = interval(Duration::from_millis(state.config.score_poll_ms));
    loop {
        ticker.tick().await;
        match state.store.tracked_matches().await {
            Ok(tracked) => {
                let live: Vec<_> = tracked
                    .into_iter()
                    .filter(|m| m.status != MatchStatus::Finished)
                    .collect();
                if !live.is_empty() {
                    state.cache.poll(&live).await;
                }
            }
            Err(e) => error!("Failed to load tracked matches: {:#}", e),
        }
    }
}

/// Drive one lifecycle tick per tracked match. A tick failure skips the
/// match until the next tick.
async fn lifecycle_polling(state: AppState) {
    info!(
        "⚙️  Starting lifecycle ticks every {}ms",
        state.config.lifecycle_tick_ms
    );
    let mut ticker = interval(Duration::from_millis(state.config.lifecycle_tick_ms));
    loop {
        ticker.tick().await;
        let tracked = match state.store.tracked_matches().await {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to load tracked matches: {:#}", e);
                continue;
            }
        };
        for m in tracked {
            if let Err(e) = state.coordinator.tick(&m).await {
                warn!("Lifecycle tick failed for {}: {:#}", m.match_id, e);
            }
        }
    }
}

/// Slow sweep settling match-winner bets on completed matches.
async fn outright_polling(state: AppState) {
    info!(
        "🏆 Starting outright settlement sweep every {}s",
        state.config.outright_poll_secs
    );
    let mut ticker = interval(Duration::from_secs(state.config.outright_poll_secs));
    loop {
        ticker.tick().await;
        if let Err(e) = state.outright.sweep().await {
            error!("Outright settlement sweep failed: {:#}", e);
        }
    }
}

/// Drop in-memory state for matches no longer tracked.
async fn state_pruning(state: AppState) {
    let mut ticker = interval(Duration::from_secs(300));
    loop {
        ticker.tick().await;
        let referenced: HashSet<String> = match state.store.tracked_matches().await {
            Ok(t) => t.into_iter().map(|m| m.match_id).collect(),
            Err(_) => continue,
        };
        let removed = state
            .reconciler
            .purge_stale(state.config.state_ttl_secs, &referenced);
        if removed > 0 {
            info!("🧹 Pruned {} stale match states", removed);
        }
    }
}
