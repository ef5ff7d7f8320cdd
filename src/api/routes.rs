use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::markets::PlaceResult;
use crate::models::{
    Account, Bet, BetType, InstanceBet, InstanceMarket, MatchState, MatchStatus, MatchType,
    TrackedMatch,
};
use crate::store::{LedgerEntry, PlacementOutcome};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/matches", get(list_matches))
        .route("/api/matches/track", post(track_match))
        .route("/api/matches/:id/state", get(match_state))
        .route("/api/matches/:id/markets", get(match_markets))
        .route("/api/markets/active", get(active_markets))
        .route("/api/markets/player", post(create_player_market))
        .route("/api/accounts", post(create_account))
        .route("/api/accounts/:id", get(get_account))
        .route("/api/accounts/:id/ledger", get(get_ledger))
        .route("/api/accounts/deposit", post(deposit))
        .route("/api/bets/instance", post(place_instance_bet))
        .route("/api/bets", post(place_outright_bet))
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ===== Route Handlers =====

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_matches(State(state): State<AppState>) -> Result<Json<Vec<TrackedMatch>>, ApiError> {
    Ok(Json(state.store.tracked_matches().await?))
}

/// Register a match for live tracking. Idempotent on match_id.
async fn track_match(
    State(state): State<AppState>,
    Json(req): Json<TrackMatchRequest>,
) -> Result<Json<TrackedMatch>, ApiError> {
    if req.external_id.trim().is_empty() {
        return Err(ApiError::BadRequest("external_id is required".to_string()));
    }
    let tracked = TrackedMatch {
        match_id: req
            .match_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        external_id: req.external_id,
        sport: req.sport.unwrap_or_else(|| "cricket".to_string()),
        home_team: req.home_team,
        away_team: req.away_team,
        match_type: req
            .match_type
            .as_deref()
            .map(MatchType::from_str)
            .unwrap_or(MatchType::T20),
        status: MatchStatus::Upcoming,
    };
    state.store.upsert_match(&tracked).await?;
    tracing::info!(
        "📋 Tracking match {} ({} vs {})",
        tracked.match_id,
        tracked.home_team,
        tracked.away_team
    );
    Ok(Json(tracked))
}

async fn match_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchState>, ApiError> {
    state
        .reconciler
        .get(&id)
        .map(Json)
        .ok_or(ApiError::NotFound(format!("no state for match {}", id)))
}

async fn match_markets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<MarketsResponse> {
    let markets = state.registry.active_for_match(&id);
    Json(MarketsResponse {
        count: markets.len(),
        markets,
    })
}

async fn active_markets(State(state): State<AppState>) -> Json<MarketsResponse> {
    let markets = state.registry.all_active();
    Json(MarketsResponse {
        count: markets.len(),
        markets,
    })
}

/// Player lines come from an operator, not the score feed, so creation is
/// an explicit call rather than part of window regeneration.
async fn create_player_market(
    State(state): State<AppState>,
    Json(req): Json<PlayerMarketRequest>,
) -> Result<Json<InstanceMarket>, ApiError> {
    if req.player_name.trim().is_empty() {
        return Err(ApiError::BadRequest("player_name is required".to_string()));
    }
    let market = state.registry.ensure_player_market(
        &req.match_id,
        req.player_name.trim(),
        req.close_in_secs.unwrap_or(3600),
    );
    Ok(Json(market))
}

async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    if req.username.trim().is_empty() {
        return Err(ApiError::BadRequest("username is required".to_string()));
    }
    Ok(Json(
        state.store.get_or_create_account(req.username.trim()).await?,
    ))
}

async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Account>, ApiError> {
    state
        .store
        .account(id)
        .await
        .map(Json)
        .map_err(|_| ApiError::NotFound(format!("account {} not found", id)))
}

async fn get_ledger(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    Ok(Json(state.store.ledger_for_user(id).await?))
}

async fn deposit(
    State(state): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    if !(req.amount.is_finite() && req.amount > 0.0) {
        return Err(ApiError::BadRequest("amount must be positive".to_string()));
    }
    let balance = state.store.deposit(req.user_id, req.amount).await?;
    Ok(Json(BalanceResponse {
        user_id: req.user_id,
        balance,
    }))
}

async fn place_instance_bet(
    State(state): State<AppState>,
    Json(req): Json<InstanceBetRequest>,
) -> Result<Json<InstanceBet>, ApiError> {
    let result = state
        .betting
        .place(req.user_id, &req.market_id, &req.outcome, req.stake)
        .await?;
    match result {
        PlaceResult::Placed(bet) => Ok(Json(bet)),
        PlaceResult::MarketUnavailable(reason) => Err(ApiError::Conflict(reason)),
        PlaceResult::UnknownOutcome => Err(ApiError::BadRequest("unknown outcome".to_string())),
        PlaceResult::InvalidStake => {
            Err(ApiError::BadRequest("stake must be positive".to_string()))
        }
        PlaceResult::InsufficientFunds => {
            Err(ApiError::Conflict("insufficient funds".to_string()))
        }
    }
}

async fn place_outright_bet(
    State(state): State<AppState>,
    Json(req): Json<OutrightBetRequest>,
) -> Result<Json<Bet>, ApiError> {
    if !(req.stake.is_finite() && req.stake > 0.0) {
        return Err(ApiError::BadRequest("stake must be positive".to_string()));
    }
    if req.odds < 1.01 {
        return Err(ApiError::BadRequest(
            "odds must be at least 1.01".to_string(),
        ));
    }
    let bet_type = match req.bet_type.to_ascii_uppercase().as_str() {
        "BACK" => BetType::Back,
        "LAY" => BetType::Lay,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown bet type '{}'",
                other
            )))
        }
    };
    let market_id = req
        .market_id
        .unwrap_or_else(|| format!("match-winner:{}", req.match_id));
    let outcome = state
        .store
        .place_bet(
            req.user_id,
            &req.match_id,
            &market_id,
            &req.selection,
            &req.selection,
            bet_type,
            req.odds,
            req.stake,
        )
        .await?;
    match outcome {
        PlacementOutcome::Placed(bet) => Ok(Json(bet)),
        PlacementOutcome::InsufficientFunds => {
            Err(ApiError::Conflict("insufficient funds".to_string()))
        }
    }
}

/// WebSocket endpoint streaming market, score, and wallet events.
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.publisher.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let msg = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                if socket.send(Message::Text(msg)).await.is_err() {
                    return;
                }
            }
            // Slow consumer: drop the missed events and keep streaming.
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("websocket client lagged, skipped {} events", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

// ===== Request/Response Types =====

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct MarketsResponse {
    count: usize,
    markets: Vec<InstanceMarket>,
}

#[derive(Deserialize)]
struct TrackMatchRequest {
    match_id: Option<String>,
    external_id: String,
    sport: Option<String>,
    home_team: String,
    away_team: String,
    match_type: Option<String>,
}

#[derive(Deserialize)]
struct PlayerMarketRequest {
    match_id: String,
    player_name: String,
    close_in_secs: Option<i64>,
}

#[derive(Deserialize)]
struct CreateAccountRequest {
    username: String,
}

#[derive(Deserialize)]
struct DepositRequest {
    user_id: i64,
    amount: f64,
}

#[derive(Serialize)]
struct BalanceResponse {
    user_id: i64,
    balance: f64,
}

#[derive(Deserialize)]
struct InstanceBetRequest {
    user_id: i64,
    market_id: String,
    outcome: String,
    stake: f64,
}

#[derive(Deserialize)]
struct OutrightBetRequest {
    user_id: i64,
    match_id: String,
    market_id: Option<String>,
    selection: String,
    bet_type: String,
    odds: f64,
    stake: f64,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Internal(anyhow::Error),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Internal(err) => {
                tracing::error!("Request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
