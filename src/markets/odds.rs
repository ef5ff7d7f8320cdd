//! Base odds tables per instance type, with small random jitter applied at
//! market creation. Odds here are presentation prices, not a pricing model;
//! the real numbers come from the odds provider when one is configured.

use rand::Rng;
use uuid::Uuid;

use crate::models::{InstanceOutcome, InstanceType};

/// (name, base decimal odds, implied probability)
const BALL_OUTCOMES: &[(&str, f64, f64)] = &[
    ("0 Runs (Dot)", 2.8, 0.33),
    ("1 Run", 2.5, 0.37),
    ("2 Runs", 6.0, 0.15),
    ("3 Runs", 15.0, 0.06),
    ("4 Runs (Boundary)", 5.5, 0.16),
    ("6 Runs (Six)", 9.0, 0.10),
    ("Wicket", 12.0, 0.07),
    ("Wide/No Ball", 10.0, 0.08),
];

const OVER_OUTCOMES: &[(&str, f64, f64)] = &[
    ("0-5 Runs", 2.9, 0.32),
    ("6-9 Runs", 2.4, 0.39),
    ("10-14 Runs", 3.8, 0.24),
    ("15+ Runs", 7.0, 0.13),
];

const SESSION_OUTCOMES: &[(&str, f64, f64)] = &[
    ("Under 140 Runs", 2.6, 0.36),
    ("140-159 Runs", 3.2, 0.29),
    ("160-179 Runs", 3.6, 0.26),
    ("180+ Runs", 4.5, 0.20),
];

const PLAYER_OUTCOMES: &[(&str, f64, f64)] = &[
    ("Under 20 Runs", 2.2, 0.42),
    ("20-39 Runs", 2.8, 0.33),
    ("40+ Runs", 3.9, 0.24),
];

/// Classify a completed over's run count onto the OVER_OUTCOMES labels.
pub fn over_runs_label(runs: u32) -> &'static str {
    match runs {
        0..=5 => "0-5 Runs",
        6..=9 => "6-9 Runs",
        10..=14 => "10-14 Runs",
        _ => "15+ Runs",
    }
}

/// Classify an innings total onto the SESSION_OUTCOMES labels.
pub fn session_total_label(runs: u32) -> &'static str {
    match runs {
        0..=139 => "Under 140 Runs",
        140..=159 => "140-159 Runs",
        160..=179 => "160-179 Runs",
        _ => "180+ Runs",
    }
}

fn table_for(instance_type: InstanceType) -> &'static [(&'static str, f64, f64)] {
    match instance_type {
        InstanceType::NextBall => BALL_OUTCOMES,
        InstanceType::NextOver | InstanceType::CurrentOver => OVER_OUTCOMES,
        InstanceType::Session => SESSION_OUTCOMES,
        InstanceType::PlayerPerformance => PLAYER_OUTCOMES,
    }
}

/// Build the outcome set for a new market, jittering base odds by ±5%.
/// Outcomes are immutable after this point.
pub fn build_outcomes(market_id: &str, instance_type: InstanceType) -> Vec<InstanceOutcome> {
    let mut rng = rand::thread_rng();
    table_for(instance_type)
        .iter()
        .map(|(name, base, prob)| {
            let jitter: f64 = rng.gen_range(-0.05..=0.05);
            let odds = ((base * (1.0 + jitter)) * 100.0).round() / 100.0;
            InstanceOutcome {
                id: Uuid::new_v4().to_string(),
                market_id: market_id.to_string(),
                name: name.to_string(),
                odds: odds.max(1.01),
                probability: *prob,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ball_outcomes_cover_classifier_labels() {
        let outcomes = build_outcomes("m", InstanceType::NextBall);
        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        for label in [
            "0 Runs (Dot)",
            "1 Run",
            "4 Runs (Boundary)",
            "6 Runs (Six)",
            "Wicket",
            "Wide/No Ball",
        ] {
            assert!(names.contains(&label), "missing outcome {}", label);
        }
    }

    #[test]
    fn test_jitter_stays_near_base() {
        for _ in 0..20 {
            let outcomes = build_outcomes("m", InstanceType::NextBall);
            let dot = outcomes.iter().find(|o| o.name == "0 Runs (Dot)").unwrap();
            assert!(dot.odds >= 2.8 * 0.95 - 0.01 && dot.odds <= 2.8 * 1.05 + 0.01);
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(over_runs_label(4), "0-5 Runs");
        assert_eq!(over_runs_label(12), "10-14 Runs");
        assert_eq!(over_runs_label(22), "15+ Runs");
        assert_eq!(session_total_label(150), "140-159 Runs");
        assert_eq!(session_total_label(200), "180+ Runs");
    }
}
