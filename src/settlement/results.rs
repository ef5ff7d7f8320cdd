//! Best-effort match result classification.
//!
//! Cricket results arrive as free text ("India won by 6 wickets", "Match
//! drawn", "No result"); other sports provide a structured final score.
//! Both are reduced to a `MatchResult` here so settlement logic never
//! touches the raw strings. Team-name matching is fuzzy on purpose: the
//! bet's recorded selection and the feed's winner string do not guarantee
//! identical spelling.

use crate::feed::types::CompletedScore;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub winner: Option<String>,
    pub is_draw: bool,
    /// Abandoned / no-result: every open bet voids instead of winning or
    /// losing.
    pub is_void: bool,
}

impl MatchResult {
    pub fn winner(name: &str) -> Self {
        Self {
            winner: Some(name.to_string()),
            is_draw: false,
            is_void: false,
        }
    }

    pub fn draw() -> Self {
        Self {
            winner: None,
            is_draw: true,
            is_void: false,
        }
    }

    pub fn void() -> Self {
        Self {
            winner: None,
            is_draw: false,
            is_void: true,
        }
    }
}

/// Parse a cricket status string into a final result. Returns None while
/// the text does not describe a decided match.
pub fn parse_cricket_result(text: &str) -> Option<MatchResult> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();

    if lower.contains("no result") || lower.contains("abandoned") || lower.contains("cancelled") {
        return Some(MatchResult::void());
    }
    if lower.contains("drawn") || lower.contains("match tied") || lower == "tied" || lower == "draw"
    {
        return Some(MatchResult::draw());
    }

    // "X won by 6 wickets", "X win by 20 runs", "X wins by an innings"
    for marker in [" won by ", " win by ", " wins by ", " won the match", " beat "] {
        if let Some(idx) = lower.find(marker) {
            let winner = trimmed[..idx].trim();
            if !winner.is_empty() {
                return Some(MatchResult::winner(winner));
            }
        }
    }
    None
}

/// Structured score comparison for non-cricket sports.
pub fn parse_completed_score(score: &CompletedScore) -> MatchResult {
    if score.home_score > score.away_score {
        MatchResult::winner(&score.home_team)
    } else if score.away_score > score.home_score {
        MatchResult::winner(&score.away_team)
    } else {
        MatchResult::draw()
    }
}

const SUFFIXES: &[&str] = &["fc", "cc", "united", "city", "club", "xi"];
const STOPWORDS: &[&str] = &["the", "and", "team", "won", "win", "wins", "by"];

/// Casefold, strip common club suffixes, collapse whitespace.
pub fn normalize_team(name: &str) -> String {
    let lower = name.to_lowercase();
    let words: Vec<&str> = lower
        .split_whitespace()
        .filter(|w| !SUFFIXES.contains(w))
        .collect();
    words.join(" ")
}

/// Fuzzy equality between a bet's recorded selection and a parsed winner:
/// substring either way on the normalized names, or any shared significant
/// word.
pub fn teams_match(a: &str, b: &str) -> bool {
    let na = normalize_team(a);
    let nb = normalize_team(b);
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb || na.contains(&nb) || nb.contains(&na) {
        return true;
    }
    na.split_whitespace()
        .filter(|w| w.len() > 3 && !STOPWORDS.contains(w))
        .any(|w| nb.split_whitespace().any(|other| other == w))
}

/// Is this runner the draw/tie entry of a match-winner market?
pub fn is_draw_selection(runner_name: &str) -> bool {
    matches!(
        runner_name.trim().to_lowercase().as_str(),
        "draw" | "tie" | "the draw"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_win_by_wickets() {
        let r = parse_cricket_result("India won by 6 wickets").unwrap();
        assert_eq!(r.winner.as_deref(), Some("India"));
        assert!(!r.is_draw && !r.is_void);
    }

    #[test]
    fn test_parse_win_variants() {
        let r = parse_cricket_result("Mumbai Indians Win by 6 wkts").unwrap();
        assert_eq!(r.winner.as_deref(), Some("Mumbai Indians"));
        let r = parse_cricket_result("Australia beat England").unwrap();
        assert_eq!(r.winner.as_deref(), Some("Australia"));
    }

    #[test]
    fn test_parse_draw_and_void() {
        assert_eq!(parse_cricket_result("Match drawn").unwrap(), MatchResult::draw());
        assert_eq!(parse_cricket_result("Match tied").unwrap(), MatchResult::draw());
        assert_eq!(parse_cricket_result("No result").unwrap(), MatchResult::void());
        assert_eq!(
            parse_cricket_result("Match abandoned due to rain").unwrap(),
            MatchResult::void()
        );
    }

    #[test]
    fn test_parse_undecided_is_none() {
        assert!(parse_cricket_result("Live").is_none());
        assert!(parse_cricket_result("").is_none());
        assert!(parse_cricket_result("Rain delay").is_none());
    }

    #[test]
    fn test_normalize_and_match() {
        assert_eq!(normalize_team("Chennai  Super Kings"), "chennai super kings");
        assert_eq!(normalize_team("Melbourne City FC"), "melbourne");
        assert!(teams_match("Mumbai Indians", "Mumbai Indians"));
        assert!(teams_match("Mumbai Indians", "Mumbai Indians Win by 6 wkts"));
        assert!(teams_match("CSK Chennai", "Chennai Super Kings"));
        assert!(!teams_match("Mumbai Indians", "Chennai Super Kings"));
    }

    #[test]
    fn test_completed_score() {
        let score = CompletedScore {
            home_team: "Arsenal".to_string(),
            away_team: "Chelsea".to_string(),
            home_score: 2,
            away_score: 1,
        };
        assert_eq!(
            parse_completed_score(&score).winner.as_deref(),
            Some("Arsenal")
        );
        let tied = CompletedScore {
            home_score: 1,
            ..score
        };
        assert!(parse_completed_score(&tied).is_draw);
    }

    #[test]
    fn test_draw_selection() {
        assert!(is_draw_selection("Draw"));
        assert!(is_draw_selection(" tie "));
        assert!(!is_draw_selection("Mumbai Indians"));
    }
}
