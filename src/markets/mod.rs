pub mod betting;
pub mod coordinator;
pub mod odds;
pub mod registry;

pub use betting::{BettingService, PlaceResult};
pub use coordinator::MatchLifecycleCoordinator;
pub use registry::MarketRegistry;
