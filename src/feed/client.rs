//! HTTP client for the third-party cricket score API.
//!
//! Everything here is best-effort: the API may time out, return partial
//! objects, or format overs as either {over, ball} or an "overs" string.
//! Callers treat any failure as "no data this tick".

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::feed::types::{
    BallByBallSnapshot, CompletedScore, RawBallByBallResponse, RawScorecard,
    RawScorecardResponse, ScorecardInnings, ScorecardSnapshot,
};
use crate::overs;

/// The external score source, behind a trait so tests can script it and the
/// settlement path can swap in a structured result provider later.
#[async_trait]
pub trait ScoreFeed: Send + Sync {
    /// Current ball-by-ball position, if the source exposes it for this match.
    async fn ball_by_ball(&self, external_id: &str) -> Result<Option<BallByBallSnapshot>>;

    /// Whole-match scorecard; also the metadata bootstrap source.
    async fn scorecard(&self, external_id: &str) -> Result<Option<ScorecardSnapshot>>;

    /// Free-text final result for cricket ("India won by 6 wickets"), once
    /// the match has ended.
    async fn match_result(&self, external_id: &str) -> Result<Option<String>>;

    /// Structured final score for non-cricket sports.
    async fn completed_score(&self, external_id: &str) -> Result<Option<CompletedScore>>;
}

pub struct CricketApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CricketApiClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(8))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str, external_id: &str) -> String {
        format!(
            "{}/{}?apikey={}&id={}",
            self.base_url.trim_end_matches('/'),
            path,
            self.api_key,
            external_id
        )
    }
}

#[async_trait]
impl ScoreFeed for CricketApiClient {
    async fn ball_by_ball(&self, external_id: &str) -> Result<Option<BallByBallSnapshot>> {
        let url = self.url("match_bbb", external_id);
        let resp: RawBallByBallResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("ball-by-ball request failed")?
            .error_for_status()
            .context("ball-by-ball request rejected")?
            .json()
            .await
            .context("ball-by-ball response malformed")?;

        let Some(raw) = resp.data else {
            return Ok(None);
        };

        // Position comes either as explicit over/ball or as an overs string.
        let (over, ball) = match (raw.over, raw.ball) {
            (Some(o), Some(b)) => (o, b.min(overs::BALLS_PER_OVER - 1)),
            _ => match raw.overs.as_deref().and_then(overs::parse_overs_text) {
                Some(pos) => pos,
                None => {
                    debug!("ball-by-ball for {} had no position", external_id);
                    return Ok(None);
                }
            },
        };

        Ok(Some(BallByBallSnapshot {
            inning: raw.inning.unwrap_or(1).max(1),
            over,
            ball,
            runs: raw.runs.unwrap_or(0),
            wickets: raw.wickets.unwrap_or(0),
            finished: raw
                .status
                .as_deref()
                .map(|s| {
                    let s = s.to_ascii_lowercase();
                    s.contains("won") || s.contains("ended") || s.contains("finished")
                })
                .unwrap_or(false),
        }))
    }

    async fn scorecard(&self, external_id: &str) -> Result<Option<ScorecardSnapshot>> {
        let url = self.url("match_info", external_id);
        let resp: RawScorecardResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("scorecard request failed")?
            .error_for_status()
            .context("scorecard request rejected")?
            .json()
            .await
            .context("scorecard response malformed")?;

        Ok(resp.data.map(map_scorecard))
    }

    async fn match_result(&self, external_id: &str) -> Result<Option<String>> {
        let card = self.scorecard(external_id).await?;
        Ok(card.and_then(|c| {
            if c.finished {
                Some(c.status_text)
            } else {
                None
            }
        }))
    }

    async fn completed_score(&self, _external_id: &str) -> Result<Option<CompletedScore>> {
        // The cricket API has no structured score endpoint; non-cricket
        // sports come from a different provider wired in at startup.
        Ok(None)
    }
}

fn map_scorecard(raw: RawScorecard) -> ScorecardSnapshot {
    let teams = raw.teams.unwrap_or_default();
    let home_team = teams.first().cloned().unwrap_or_default();
    let away_team = teams.get(1).cloned().unwrap_or_default();

    let innings = raw
        .score
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(idx, s)| {
            let label = s.inning.unwrap_or_default();
            ScorecardInnings {
                number: parse_inning_number(&label).unwrap_or(idx as u32 + 1),
                batting_team: parse_batting_team(&label),
                runs: s.r.unwrap_or(0),
                wickets: s.w.unwrap_or(0),
                overs_text: overs_value_to_text(s.o),
            }
        })
        .collect();

    let status_text = raw.status.unwrap_or_default();
    let finished = raw.match_ended.unwrap_or(false);

    ScorecardSnapshot {
        home_team,
        away_team,
        match_type: raw.match_type.unwrap_or_default(),
        start_time: raw
            .date_time_gmt
            .as_deref()
            .and_then(parse_feed_timestamp),
        innings,
        status_text,
        finished,
    }
}

/// The overs field arrives as a number (12.4) or a string ("12.4").
fn overs_value_to_text(value: Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Innings labels look like "Mumbai Indians Inning 1".
fn parse_inning_number(label: &str) -> Option<u32> {
    label
        .rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|s| s.parse().ok())
        .filter(|n| *n > 0)
}

fn parse_batting_team(label: &str) -> String {
    match label.to_ascii_lowercase().find("inning") {
        Some(idx) => label[..idx].trim().to_string(),
        None => label.trim().to_string(),
    }
}

fn parse_feed_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}
