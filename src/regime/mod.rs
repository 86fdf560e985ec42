// Market regime detection module
pub mod detector;

pub use detector::{Regime, RegimeDetector, RegimeParams, RegimeResult};
