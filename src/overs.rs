//! Over/ball arithmetic shared by every component that reasons about ball
//! position. `total = over * 6 + ball` with ball in [0,5]; this is the
//! single source of truth for "is event X still in the future".

pub const BALLS_PER_OVER: u32 = 6;

/// Total legal deliveries bowled at position (over, ball).
pub fn ball_total(over: u32, ball: u32) -> u32 {
    over * BALLS_PER_OVER + ball
}

/// Inverse of [`ball_total`].
pub fn from_total(total: u32) -> (u32, u32) {
    (total / BALLS_PER_OVER, total % BALLS_PER_OVER)
}

/// Cricket notation, e.g. 4.2 for over 4 ball 2.
pub fn format_position(over: u32, ball: u32) -> String {
    format!("{}.{}", over, ball)
}

/// Parse scorecard overs text like "12.4" into (over, ball). Some feeds
/// emit "12" for a completed over or "12.6" at the over boundary; both are
/// normalized onto the [0,5] ball range.
pub fn parse_overs_text(text: &str) -> Option<(u32, u32)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (over_part, ball_part) = match text.split_once('.') {
        Some((o, b)) => (o, b),
        None => (text, "0"),
    };
    let over: u32 = over_part.parse().ok()?;
    let ball: u32 = ball_part.parse().ok()?;
    if ball >= BALLS_PER_OVER {
        // "12.6" means over 12 is complete, i.e. position 13.0
        Some((over + ball / BALLS_PER_OVER, ball % BALLS_PER_OVER))
    } else {
        Some((over, ball))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_round_trip() {
        assert_eq!(ball_total(0, 0), 0);
        assert_eq!(ball_total(4, 2), 26);
        assert_eq!(from_total(26), (4, 2));
        assert_eq!(from_total(12), (2, 0));
        for total in 0..600 {
            let (o, b) = from_total(total);
            assert_eq!(ball_total(o, b), total);
            assert!(b < BALLS_PER_OVER);
        }
    }

    #[test]
    fn test_parse_overs_text() {
        assert_eq!(parse_overs_text("12.4"), Some((12, 4)));
        assert_eq!(parse_overs_text("12"), Some((12, 0)));
        assert_eq!(parse_overs_text("12.6"), Some((13, 0)));
        assert_eq!(parse_overs_text(" 0.0 "), Some((0, 0)));
        assert_eq!(parse_overs_text(""), None);
        assert_eq!(parse_overs_text("abc"), None);
    }
}
