//! Normalized snapshots produced by the score feed, plus the raw wire
//! shapes of the upstream API. The upstream is best-effort: fields go
//! missing, overs are formatted inconsistently, and either source can be
//! empty for a live match.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Ball-by-ball position for the current innings. The richer of the two
/// sources; preferred when available.
#[derive(Debug, Clone)]
pub struct BallByBallSnapshot {
    pub inning: u32,
    pub over: u32,
    pub ball: u32,
    pub runs: u32,
    pub wickets: u32,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct ScorecardInnings {
    pub number: u32,
    pub batting_team: String,
    pub runs: u32,
    pub wickets: u32,
    /// Overs as reported, e.g. "12.4"; parsed with overs::parse_overs_text.
    pub overs_text: String,
}

/// Coarser whole-match view; the fallback source and the bootstrap source
/// for match metadata.
#[derive(Debug, Clone)]
pub struct ScorecardSnapshot {
    pub home_team: String,
    pub away_team: String,
    pub match_type: String,
    pub start_time: Option<DateTime<Utc>>,
    pub innings: Vec<ScorecardInnings>,
    /// Free-text status, e.g. "Live", "India won by 6 wickets".
    pub status_text: String,
    pub finished: bool,
}

/// Structured final score for non-cricket sports.
#[derive(Debug, Clone)]
pub struct CompletedScore {
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
}

// ===== Raw wire shapes =====

#[derive(Debug, Deserialize)]
pub(crate) struct RawBallByBallResponse {
    pub data: Option<RawBallByBall>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBallByBall {
    pub inning: Option<u32>,
    pub over: Option<u32>,
    pub ball: Option<u32>,
    /// Some deployments report "overs": "12.4" instead of over/ball.
    pub overs: Option<String>,
    pub runs: Option<u32>,
    pub wickets: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawScorecardResponse {
    pub data: Option<RawScorecard>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawScorecard {
    pub teams: Option<Vec<String>>,
    #[serde(rename = "matchType")]
    pub match_type: Option<String>,
    #[serde(rename = "dateTimeGMT")]
    pub date_time_gmt: Option<String>,
    pub score: Option<Vec<RawInningsScore>>,
    pub status: Option<String>,
    #[serde(rename = "matchEnded")]
    pub match_ended: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawInningsScore {
    pub inning: Option<String>,
    pub r: Option<u32>,
    pub w: Option<u32>,
    pub o: Option<serde_json::Value>,
}
