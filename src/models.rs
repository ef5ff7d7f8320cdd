use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::overs;

/// Match lifecycle as reported by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Upcoming,
    Live,
    Finished,
}

impl MatchStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MatchStatus::Upcoming => "UPCOMING",
            MatchStatus::Live => "LIVE",
            MatchStatus::Finished => "FINISHED",
        }
    }
}

/// Instance market status. Transitions are one-directional apart from
/// OPEN <-> SUSPENDED; CLOSED markets are consumed by settlement only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Pending,
    Open,
    Suspended,
    Closed,
    Settled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MarketStatus::Pending => "PENDING",
            MarketStatus::Open => "OPEN",
            MarketStatus::Suspended => "SUSPENDED",
            MarketStatus::Closed => "CLOSED",
            MarketStatus::Settled => "SETTLED",
        }
    }

    /// A market still accepting or holding wagers (not terminal).
    pub fn is_active(&self) -> bool {
        matches!(self, MarketStatus::Open | MarketStatus::Suspended)
    }

    /// Legal one-step transitions. SETTLED is reachable only from CLOSED.
    pub fn can_transition_to(&self, next: MarketStatus) -> bool {
        use MarketStatus::*;
        matches!(
            (self, next),
            (Pending, Open)
                | (Open, Suspended)
                | (Open, Closed)
                | (Suspended, Open)
                | (Suspended, Closed)
                | (Closed, Settled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceType {
    NextBall,
    NextOver,
    CurrentOver,
    Session,
    PlayerPerformance,
}

impl InstanceType {
    pub fn as_str(&self) -> &str {
        match self {
            InstanceType::NextBall => "NEXT_BALL",
            InstanceType::NextOver => "NEXT_OVER",
            InstanceType::CurrentOver => "CURRENT_OVER",
            InstanceType::Session => "SESSION",
            InstanceType::PlayerPerformance => "PLAYER_PERFORMANCE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetStatus {
    Open,
    Won,
    Lost,
    Void,
}

impl BetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BetStatus::Open => "OPEN",
            BetStatus::Won => "WON",
            BetStatus::Lost => "LOST",
            BetStatus::Void => "VOID",
        }
    }

    pub fn from_str(s: &str) -> Option<BetStatus> {
        match s {
            "OPEN" => Some(BetStatus::Open),
            "WON" => Some(BetStatus::Won),
            "LOST" => Some(BetStatus::Lost),
            "VOID" => Some(BetStatus::Void),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetType {
    Back,
    Lay,
}

impl BetType {
    pub fn as_str(&self) -> &str {
        match self {
            BetType::Back => "BACK",
            BetType::Lay => "LAY",
        }
    }

    pub fn from_str(s: &str) -> Option<BetType> {
        match s {
            "BACK" => Some(BetType::Back),
            "LAY" => Some(BetType::Lay),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    T20,
    Odi,
    Test,
    Other,
}

impl MatchType {
    pub fn from_str(s: &str) -> MatchType {
        match s.to_ascii_lowercase().as_str() {
            "t20" | "t20i" | "ipl" => MatchType::T20,
            "odi" | "one-day" | "oneday" => MatchType::Odi,
            "test" => MatchType::Test,
            _ => MatchType::Other,
        }
    }

    /// Upper bound for the forward market window. Test matches are
    /// effectively uncapped (450 overs covers the longest Test innings).
    pub fn max_overs(&self) -> u32 {
        match self {
            MatchType::T20 => 20,
            MatchType::Odi => 50,
            MatchType::Test | MatchType::Other => 450,
        }
    }
}

/// Compact per-match score snapshot held in the short-expiry cache.
/// Staleness means "unknown", never "last known".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveScoreState {
    pub match_id: String,
    pub over: u32,
    pub ball: u32,
    pub runs: u32,
    pub wickets: u32,
    pub inning: u32,
    pub status: MatchStatus,
    pub updated_at: DateTime<Utc>,
}

/// Classification of the most recent delivery, derived from the score delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallEvent {
    pub runs: u32,
    pub is_wicket: bool,
    pub is_boundary: bool,
    pub is_six: bool,
    pub is_extra: bool,
    pub timestamp: DateTime<Utc>,
}

impl BallEvent {
    /// Human label matching the NEXT_BALL outcome names.
    pub fn outcome_label(&self) -> String {
        if self.is_wicket {
            "Wicket".to_string()
        } else if self.is_extra {
            "Wide/No Ball".to_string()
        } else if self.is_six {
            "6 Runs (Six)".to_string()
        } else if self.is_boundary {
            "4 Runs (Boundary)".to_string()
        } else {
            match self.runs {
                0 => "0 Runs (Dot)".to_string(),
                1 => "1 Run".to_string(),
                n => format!("{} Runs", n),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InningsSummary {
    pub number: u32,
    pub batting_team: String,
    pub runs: u32,
    pub wickets: u32,
    pub over: u32,
    pub ball: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchMetadata {
    pub home_team: String,
    pub away_team: String,
    pub match_type: MatchType,
    pub start_time: Option<DateTime<Utc>>,
}

/// Authoritative per-match state, owned by the reconciler.
/// `current_over * 6 + current_ball` is monotonically non-decreasing
/// while the match is LIVE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchState {
    pub match_id: String,
    pub external_id: String,
    pub status: MatchStatus,
    pub current_over: u32,
    pub current_ball: u32,
    pub total_runs: u32,
    pub total_wickets: u32,
    pub current_inning: u32,
    pub innings: Vec<InningsSummary>,
    pub last_ball: Option<BallEvent>,
    pub last_updated: DateTime<Utc>,
    pub metadata: MatchMetadata,
}

impl MatchState {
    pub fn ball_total(&self) -> u32 {
        overs::ball_total(self.current_over, self.current_ball)
    }
}

/// Outcome of an instance market; immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceOutcome {
    pub id: String,
    pub market_id: String,
    pub name: String,
    pub odds: f64,
    pub probability: f64,
}

/// A micro-market on a specific in-match event (one delivery, one over,
/// a session total, a player line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMarket {
    pub id: String,
    pub match_id: String,
    pub instance_type: InstanceType,
    pub name: String,
    pub description: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub status: MarketStatus,
    /// Free-form reference to the underlying event ("ball 4.2", "innings 1").
    pub event_reference: String,
    pub over_number: Option<u32>,
    pub ball_number: Option<u32>,
    pub outcomes: Vec<InstanceOutcome>,
}

impl InstanceMarket {
    /// Total-ball position of the referenced delivery, for ball and over
    /// level markets.
    pub fn ball_total(&self) -> Option<u32> {
        let over = self.over_number?;
        Some(overs::ball_total(over, self.ball_number.unwrap_or(0)))
    }
}

/// Wager against one outcome of an instance market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceBet {
    pub id: i64,
    pub user_id: i64,
    pub match_id: String,
    pub market_id: String,
    pub outcome_name: String,
    pub stake: f64,
    pub potential_profit: f64,
    pub status: BetStatus,
    pub winning_outcome: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Traditional back/lay bet on the match winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: i64,
    pub user_id: i64,
    pub match_id: String,
    pub market_id: String,
    pub runner_id: String,
    pub runner_name: String,
    pub bet_type: BetType,
    pub odds: f64,
    pub stake: f64,
    pub potential_profit: f64,
    pub status: BetStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// Lay liability: what the layer pays out if the selection wins.
    pub fn liability(&self) -> f64 {
        self.stake * (self.odds - 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub balance: f64,
    pub exposure: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A match registered for live tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedMatch {
    pub match_id: String,
    pub external_id: String,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub match_type: MatchType,
    pub status: MatchStatus,
}

/// Events fanned out to websocket subscribers. Delivery is best-effort;
/// the settlement path never awaits it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    MarketUpdate {
        match_id: String,
        markets: Vec<InstanceMarket>,
    },
    MarketSettled {
        match_id: String,
        market_id: String,
        winning_outcome: String,
    },
    BetSettled {
        user_id: i64,
        bet_id: i64,
        status: BetStatus,
        payout: f64,
    },
    WalletUpdate {
        user_id: i64,
        balance: f64,
    },
    ScoreUpdate {
        match_id: String,
        over: u32,
        ball: u32,
        runs: u32,
        wickets: u32,
    },
}
