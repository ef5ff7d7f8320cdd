//! Live score ingestion: the external feed client, scripted feed for
//! tests/paper runs, and the short-expiry per-match score cache.

pub mod client;
pub mod live_cache;
pub mod testing;
pub mod types;

pub use client::{CricketApiClient, ScoreFeed};
pub use live_cache::LiveScoreCache;
