//! Scripted score feed for tests and paper runs.
//!
//! Snapshots are queued per external match id; each fetch pops the next
//! queued snapshot and the last one sticks, so a test can script a sequence
//! of deliveries and then keep polling.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::feed::client::ScoreFeed;
use crate::feed::types::{BallByBallSnapshot, CompletedScore, ScorecardSnapshot};

#[derive(Default)]
pub struct ScriptedFeed {
    ball_by_ball: Mutex<HashMap<String, VecDeque<BallByBallSnapshot>>>,
    scorecards: Mutex<HashMap<String, ScorecardSnapshot>>,
    results: Mutex<HashMap<String, String>>,
    completed: Mutex<HashMap<String, CompletedScore>>,
    failing: Mutex<HashSet<String>>,
}

impl ScriptedFeed {
    pub fn push_ball_by_ball(&self, external_id: &str, snapshot: BallByBallSnapshot) {
        self.ball_by_ball
            .lock()
            .entry(external_id.to_string())
            .or_default()
            .push_back(snapshot);
    }

    pub fn set_scorecard(&self, external_id: &str, card: ScorecardSnapshot) {
        self.scorecards.lock().insert(external_id.to_string(), card);
    }

    pub fn set_result(&self, external_id: &str, result: &str) {
        self.results
            .lock()
            .insert(external_id.to_string(), result.to_string());
    }

    pub fn set_completed_score(&self, external_id: &str, score: CompletedScore) {
        self.completed.lock().insert(external_id.to_string(), score);
    }

    /// Every fetch for this match errors until cleared.
    pub fn fail_match(&self, external_id: &str) {
        self.failing.lock().insert(external_id.to_string());
    }

    pub fn clear_failure(&self, external_id: &str) {
        self.failing.lock().remove(external_id);
    }

    fn check_failing(&self, external_id: &str) -> Result<()> {
        if self.failing.lock().contains(external_id) {
            return Err(anyhow!("scripted failure for {}", external_id));
        }
        Ok(())
    }
}

#[async_trait]
impl ScoreFeed for ScriptedFeed {
    async fn ball_by_ball(&self, external_id: &str) -> Result<Option<BallByBallSnapshot>> {
        self.check_failing(external_id)?;
        let mut map = self.ball_by_ball.lock();
        let Some(queue) = map.get_mut(external_id) else {
            return Ok(None);
        };
        if queue.len() > 1 {
            queue.pop_front();
        }
        Ok(queue.front().cloned())
    }

    async fn scorecard(&self, external_id: &str) -> Result<Option<ScorecardSnapshot>> {
        self.check_failing(external_id)?;
        Ok(self.scorecards.lock().get(external_id).cloned())
    }

    async fn match_result(&self, external_id: &str) -> Result<Option<String>> {
        self.check_failing(external_id)?;
        Ok(self.results.lock().get(external_id).cloned())
    }

    async fn completed_score(&self, external_id: &str) -> Result<Option<CompletedScore>> {
        self.check_failing(external_id)?;
        Ok(self.completed.lock().get(external_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(over: u32, ball: u32) -> BallByBallSnapshot {
        BallByBallSnapshot {
            inning: 1,
            over,
            ball,
            runs: 0,
            wickets: 0,
            finished: false,
        }
    }

    #[tokio::test]
    async fn test_each_fetch_serves_the_newest_queued_snapshot() {
        let feed = ScriptedFeed::default();
        feed.push_ball_by_ball("m", snap(3, 0));
        let got = feed.ball_by_ball("m").await.unwrap().unwrap();
        assert_eq!((got.over, got.ball), (3, 0));

        // Queueing a newer snapshot advances the feed on the next fetch,
        // never serving the superseded position again.
        feed.push_ball_by_ball("m", snap(3, 1));
        let got = feed.ball_by_ball("m").await.unwrap().unwrap();
        assert_eq!((got.over, got.ball), (3, 1));

        // The last snapshot sticks for repeated polls.
        let got = feed.ball_by_ball("m").await.unwrap().unwrap();
        assert_eq!((got.over, got.ball), (3, 1));
    }
}
