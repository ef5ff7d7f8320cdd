//! Settlement engines: per-delivery micro-market settlement and whole-match
//! back/lay settlement, plus the best-effort result classifier they share.

pub mod instance;
pub mod outright;
pub mod results;

pub use instance::{InstanceSettlement, SettleSummary};
pub use outright::{decide_bet, OutrightSettlement};
pub use results::MatchResult;
