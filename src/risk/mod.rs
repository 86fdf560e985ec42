// Risk management module
pub mod manager;

pub use manager::{LiqGap, OngoingRisk, PositionSizing, RiskCheck, RiskConfig, RiskManager};
