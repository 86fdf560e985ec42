// Veto system: hard blocks evaluated before and during execution
pub mod checks;
pub mod microstructure;

pub use checks::{AdlStatus, VetoCheck, VetoKind};
pub use microstructure::{micro_ok, MicroGateConfig, MicroGateResult, MicroVeto};

use serde::{Deserialize, Serialize};

use crate::models::{MicroSnapshot, Side};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VetoConfig {
    pub flow_cliff_z: f64,
    pub flow_window: usize,
    pub max_spread_pct: f64,     // 0.10 = 10 bps
    pub min_depth_ratio: f64,    // Fraction of baseline depth
    pub min_absolute_depth: f64, // Floor when no baseline is known
    pub max_mark_last_pct: f64,
    pub max_funding_multiplier: f64,
    pub liquidation_shock_multiplier: f64,
}

impl Default for VetoConfig {
    fn default() -> Self {
        Self {
            flow_cliff_z: 2.0,
            flow_window: 10,
            max_spread_pct: 0.10,
            min_depth_ratio: 0.5,
            min_absolute_depth: 100_000.0,
            max_mark_last_pct: 0.15,
            max_funding_multiplier: 3.0,
            liquidation_shock_multiplier: 10.0,
        }
    }
}

/// Venue-level readings that feed the veto checks; all optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub mark_price: Option<f64>,
    pub last_price: Option<f64>,
    pub current_funding: Option<f64>,
    pub median_funding: Option<f64>,
    pub adl_status: Option<AdlStatus>,
    pub liquidation_volume: Option<f64>,
    pub baseline_liquidation_volume: Option<f64>,
    pub baseline_depth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VetoResult {
    pub any_veto: bool,
    pub veto_count: usize,
    pub checks: Vec<VetoCheck>,
    pub reasons: Vec<String>,
}

impl VetoResult {
    pub fn from_checks(checks: Vec<VetoCheck>) -> Self {
        let reasons: Vec<String> = checks
            .iter()
            .filter(|c| c.veto)
            .map(|c| c.reason.clone().unwrap_or_else(|| c.kind.to_string()))
            .collect();
        Self {
            any_veto: !reasons.is_empty(),
            veto_count: reasons.len(),
            checks,
            reasons,
        }
    }

    /// Result with no checks run and nothing vetoed
    pub fn clear() -> Self {
        Self::from_checks(Vec::new())
    }

    pub fn check(&self, kind: VetoKind) -> Option<&VetoCheck> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    pub fn summary(&self) -> String {
        if self.any_veto {
            self.reasons.join("; ")
        } else {
            "no vetoes".to_string()
        }
    }
}

pub struct VetoSystem {
    config: VetoConfig,
}

impl Default for VetoSystem {
    fn default() -> Self {
        Self::new(VetoConfig::default())
    }
}

impl VetoSystem {
    pub fn new(config: VetoConfig) -> Self {
        Self { config }
    }

    /// Run every check for `side`
    ///
    /// `flow` is the cumulative flow series (CVD or OBV) of the tape timeframe.
    pub fn run(
        &self,
        side: Side,
        flow: Option<&[f64]>,
        snapshot: Option<&MicroSnapshot>,
        market: &MarketContext,
    ) -> VetoResult {
        let cfg = &self.config;
        let checks = vec![
            checks::check_flow_cliff(flow.unwrap_or(&[]), side, cfg.flow_cliff_z, cfg.flow_window),
            checks::check_spread(snapshot, cfg.max_spread_pct),
            checks::check_depth(
                snapshot,
                market.baseline_depth,
                cfg.min_depth_ratio,
                cfg.min_absolute_depth,
            ),
            checks::check_mark_last(market.mark_price, market.last_price, cfg.max_mark_last_pct),
            checks::check_funding(
                market.current_funding,
                market.median_funding,
                cfg.max_funding_multiplier,
            ),
            checks::check_adl(market.adl_status),
            checks::check_liquidation_shock(
                market.liquidation_volume,
                market.baseline_liquidation_volume,
                cfg.liquidation_shock_multiplier,
            ),
        ];

        let result = VetoResult::from_checks(checks);
        if result.any_veto {
            tracing::warn!(%side, count = result.veto_count, reasons = %result.summary(), "veto triggered");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(spread_bps: f64) -> MicroSnapshot {
        MicroSnapshot {
            timestamp: Utc::now(),
            best_bid: 100.0,
            best_ask: 100.05,
            spread_bps,
            bid_depth: 150_000.0,
            ask_depth: 100_000.0,
            ladder_imbalance: 0.2,
            cvd: 0.0,
            cvd_slope: 0.0,
            trade_volume: 0.0,
            ok: true,
        }
    }

    #[test]
    fn test_clean_market_has_no_veto() {
        let result = VetoSystem::default().run(
            Side::Long,
            None,
            Some(&snapshot(5.0)),
            &MarketContext::default(),
        );
        assert!(!result.any_veto);
        assert_eq!(result.veto_count, 0);
        assert_eq!(result.checks.len(), 7);
        assert_eq!(result.summary(), "no vetoes");
    }

    #[test]
    fn test_vetoes_accumulate() {
        let market = MarketContext {
            mark_price: Some(101.0),
            last_price: Some(100.0),
            adl_status: Some(AdlStatus::High),
            ..MarketContext::default()
        };
        let result = VetoSystem::default().run(Side::Short, None, Some(&snapshot(25.0)), &market);
        assert!(result.any_veto);
        assert_eq!(result.veto_count, 3);
        assert_eq!(result.reasons.len(), 3);
        assert!(result.check(VetoKind::Spread).unwrap().veto);
        assert!(result.check(VetoKind::MarkLast).unwrap().veto);
        assert!(result.check(VetoKind::Adl).unwrap().veto);
        assert!(!result.check(VetoKind::Funding).unwrap().veto);
    }
}
