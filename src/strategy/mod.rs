// Swing detection module: extremum scanning and breakout confirmation
pub mod confirmation;
pub mod invalidation;
pub mod scanner;

pub use confirmation::{micro_confirm, ConfirmationConfig, ConfirmationOutcome};
pub use invalidation::InvalidationCache;
pub use scanner::{is_local_max, is_local_min, CandidateScanner, ScanRejection, ScannerConfig};
