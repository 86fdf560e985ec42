//! Application configuration
//!
//! Layered with the `config` crate: compiled defaults, then an optional
//! `swingbot.toml`, then `SWINGBOT__*` environment variables where `__`
//! separates nesting levels (`SWINGBOT__RISK__MAX_LEVERAGE=4`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::confluence::{ConfluenceConfig, ConfluenceEngine};
use crate::error::{Error, Result};
use crate::execution::{KlineSource, OrderConfig, SnapshotSource, TpSlConfig};
use crate::regime::RegimeDetector;
use crate::risk::RiskConfig;
use crate::state_machine::{MachineConfig, StateMachine};
use crate::strategy::{CandidateScanner, ConfirmationConfig, ScannerConfig};
use crate::veto::{VetoConfig, VetoSystem};

/// Bollinger-width percentile thresholds; the detector is its own config
pub type RegimeConfig = RegimeDetector;

const DEFAULT_FILE: &str = "swingbot";
const ENV_PREFIX: &str = "SWINGBOT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub confirmation: ConfirmationConfig,
    pub regime: RegimeConfig,
    pub confluence: ConfluenceConfig,
    pub veto: VetoConfig,
    pub risk: RiskConfig,
    pub orders: OrderConfig,
    pub tp_sl: TpSlConfig,
    pub machine: MachineConfig,
}

impl AppConfig {
    /// Load defaults, then `path` (or `swingbot.toml` if present), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())?;
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };

        let config: AppConfig = Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        tracing::debug!(path = ?path, "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.confluence.weights.validate()?;
        self.tp_sl.validate()?;

        if self.risk.max_leverage <= 0.0 || self.risk.default_leverage > self.risk.max_leverage {
            return Err(Error::Config(format!(
                "default leverage {} outside (0, {}]",
                self.risk.default_leverage, self.risk.max_leverage
            )));
        }
        if self.scanner.extrema_window == 0 || self.confirmation.confirm_window == 0 {
            return Err(Error::Config("scan and confirm windows must be positive".to_string()));
        }
        if self.regime.squeeze_threshold >= self.regime.wide_threshold {
            return Err(Error::Config(format!(
                "squeeze threshold {} must sit below wide threshold {}",
                self.regime.squeeze_threshold, self.regime.wide_threshold
            )));
        }
        if self.orders.max_slip_attempts == 0 {
            return Err(Error::Config("max_slip_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Wire a state machine with every stage configured from this file
    pub fn build_machine(
        &self,
        klines: Arc<dyn KlineSource>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Result<StateMachine> {
        Ok(StateMachine::new(klines, snapshots)
            .with_config(self.machine.clone())
            .with_scanner(CandidateScanner::new(self.scanner.clone()))
            .with_confirmation(self.confirmation.clone())
            .with_regime(self.regime.clone())
            .with_confluence(ConfluenceEngine::new(self.confluence.clone())?)
            .with_vetoes(VetoSystem::new(self.veto.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scanner.extrema_window, 12);
        assert_eq!(config.machine.invalidation_ttl_minutes, 15);
        assert!((config.risk.max_leverage - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("swingbot-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[risk]\nmax_leverage = 4.0\n\n[scanner]\nextrema_window = 8").unwrap();
        drop(file);

        let config = AppConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert!((config.risk.max_leverage - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.scanner.extrema_window, 8);
        // Untouched sections keep their defaults
        assert!((config.tp_sl.tp1_pct - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("swingbot-does-not-exist.toml");
        assert!(matches!(AppConfig::load(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut config = AppConfig::default();
        config.confluence.weights.tape = 30.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_inverted_regime_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.regime.squeeze_threshold = 80.0;
        assert!(config.validate().is_err());
    }
}
