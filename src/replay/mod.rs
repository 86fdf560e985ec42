// Offline replay: synthetic market data through the full pipeline with a paper exchange
pub mod runner;
pub mod summary;
pub mod synthetic;

pub use runner::{ReplayRunner, ReplaySettings};
pub use summary::{ReplayMetrics, ReplaySummary};
pub use synthetic::{bucket_start, resample, MarketScenario, SyntheticDataGenerator};
