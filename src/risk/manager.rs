use serde::{Deserialize, Serialize};

use crate::models::{Side, Tier};

/// Configuration for sizing and liquidation guards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub account_balance: f64,
    pub base_position_size: f64,       // Notional USD for a full (A-tier) position
    pub max_leverage: f64,
    pub default_leverage: f64,
    pub min_liq_gap_multiplier: f64,   // Liquidation must sit this many stops away
    pub max_risk_per_trade_pct: f64,   // Of account balance
    pub maintenance_margin_rate: f64,
    pub max_margin_fraction: f64,      // Of account balance
    pub near_stop_pct: f64,            // Of entry price
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            account_balance: 10_000.0,
            base_position_size: 1_000.0,
            max_leverage: 5.0,
            default_leverage: 3.0,
            min_liq_gap_multiplier: 3.0,
            max_risk_per_trade_pct: 2.0,
            maintenance_margin_rate: 0.005,
            max_margin_fraction: 0.8,
            near_stop_pct: 0.005,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiqGap {
    pub liq_price: f64,
    pub liq_distance: f64,
    pub stop_distance: f64,
    pub multiplier: f64,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizing {
    pub position_size_usd: f64,
    pub quantity: f64,
    pub margin_required: f64,
    pub risk_usd: f64,     // After the risk cap
    pub max_risk_usd: f64,
    pub risk_capped: bool, // True when the cap shrank the position
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub entry_allowed: bool,
    pub leverage: f64,
    pub liq_price: f64,
    pub liq_gap_multiplier: f64,
    pub position_size_usd: f64,
    pub quantity: f64,
    pub margin_required: f64,
    pub risk_usd: f64,
    pub max_risk_usd: f64,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OngoingRisk {
    pub pnl_pct: f64,
    pub distance_to_stop: f64,
    pub near_stop: bool,
    pub liq_gap_ok: bool,
}

pub struct RiskManager {
    config: RiskConfig,
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Liquidation price for an isolated position
    ///
    /// Long: entry × (1 - 1/lev + mmr); short: entry × (1 + 1/lev - mmr)
    pub fn liquidation_price(&self, entry: f64, side: Side, leverage: f64) -> f64 {
        let mmr = self.config.maintenance_margin_rate;
        match side {
            Side::Long => entry * (1.0 - 1.0 / leverage + mmr),
            Side::Short => entry * (1.0 + 1.0 / leverage - mmr),
        }
    }

    pub fn liq_gap(&self, entry: f64, stop: f64, side: Side, leverage: f64) -> LiqGap {
        let liq_price = self.liquidation_price(entry, side, leverage);
        let liq_distance = (entry - liq_price).abs();
        let stop_distance = (entry - stop).abs();
        let multiplier = if stop_distance > 0.0 {
            liq_distance / stop_distance
        } else {
            0.0
        };

        LiqGap {
            liq_price,
            liq_distance,
            stop_distance,
            multiplier,
            ok: multiplier >= self.config.min_liq_gap_multiplier,
        }
    }

    /// Tier-scaled notional, shrunk until the stop-out loss fits the risk cap
    pub fn position_size(&self, tier: Tier, entry: f64, stop: f64, leverage: f64) -> PositionSizing {
        let max_risk_usd = self.config.account_balance * self.config.max_risk_per_trade_pct / 100.0;
        let stop_pct = if entry > 0.0 {
            (entry - stop).abs() / entry
        } else {
            0.0
        };

        let mut position_size_usd = self.config.base_position_size * tier.size_multiplier();
        let mut risk_usd = position_size_usd * stop_pct;
        let risk_capped = risk_usd > max_risk_usd && stop_pct > 0.0;
        if risk_capped {
            position_size_usd = max_risk_usd / stop_pct;
            risk_usd = position_size_usd * stop_pct;
        }

        PositionSizing {
            position_size_usd,
            quantity: if entry > 0.0 { position_size_usd / entry } else { 0.0 },
            margin_required: position_size_usd / leverage,
            risk_usd,
            max_risk_usd,
            risk_capped,
        }
    }

    pub fn check_entry_risk(
        &self,
        entry: f64,
        stop: f64,
        side: Side,
        tier: Tier,
        leverage: f64,
    ) -> RiskCheck {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if !(leverage > 0.0 && leverage <= self.config.max_leverage) {
            reasons.push(format!(
                "leverage {leverage:.1}x outside (0, {:.1}x]",
                self.config.max_leverage
            ));
        }
        if !tier.is_tradeable() {
            reasons.push("tier SKIP carries no size".to_string());
        }

        let leverage_for_math = if leverage > 0.0 { leverage } else { 1.0 };
        let gap = self.liq_gap(entry, stop, side, leverage_for_math);
        if gap.stop_distance <= 0.0 {
            reasons.push("stop equals entry".to_string());
        } else if !gap.ok {
            reasons.push(format!(
                "liq-gap insufficient: {:.2}x < {:.1}x",
                gap.multiplier, self.config.min_liq_gap_multiplier
            ));
        }

        let sizing = self.position_size(tier, entry, stop, leverage_for_math);
        if sizing.risk_capped {
            warnings.push(format!(
                "size reduced to keep risk at ${:.2}",
                sizing.max_risk_usd
            ));
        }

        let margin_available = self.config.account_balance * self.config.max_margin_fraction;
        if sizing.margin_required > margin_available {
            reasons.push(format!(
                "insufficient margin: required ${:.2}, available ${:.2}",
                sizing.margin_required, margin_available
            ));
        }

        let entry_allowed = reasons.is_empty();
        if entry_allowed {
            tracing::info!(
                %tier,
                liq_gap = gap.multiplier,
                size_usd = sizing.position_size_usd,
                "entry risk check passed"
            );
        } else {
            tracing::warn!(reasons = %reasons.join(", "), "entry risk check failed");
        }

        RiskCheck {
            entry_allowed,
            leverage,
            liq_price: gap.liq_price,
            liq_gap_multiplier: gap.multiplier,
            position_size_usd: sizing.position_size_usd,
            quantity: sizing.quantity,
            margin_required: sizing.margin_required,
            risk_usd: sizing.risk_usd,
            max_risk_usd: sizing.max_risk_usd,
            reasons,
            warnings,
        }
    }

    /// Mark-to-market view of an open position
    pub fn check_ongoing_risk(
        &self,
        current: f64,
        entry: f64,
        stop: f64,
        side: Side,
        leverage: f64,
    ) -> OngoingRisk {
        let gap = self.liq_gap(entry, stop, side, leverage);
        let (pnl_pct, distance_to_stop) = match side {
            Side::Long => ((current - entry) / entry * 100.0, current - stop),
            Side::Short => ((entry - current) / entry * 100.0, stop - current),
        };

        let result = OngoingRisk {
            pnl_pct,
            distance_to_stop,
            near_stop: distance_to_stop < entry * self.config.near_stop_pct,
            liq_gap_ok: gap.ok,
        };
        if !result.liq_gap_ok {
            tracing::warn!(liq_gap = gap.multiplier, pnl_pct, "ongoing liq-gap breach");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liquidation_prices() {
        let rm = RiskManager::default();
        let long = rm.liquidation_price(100.0, Side::Long, 5.0);
        let short = rm.liquidation_price(100.0, Side::Short, 5.0);
        assert!((long - 80.5).abs() < 1e-9);
        assert!((short - 119.5).abs() < 1e-9);
    }

    #[test]
    fn test_high_leverage_tight_liq_gap_rejected() {
        let rm = RiskManager::new(RiskConfig {
            max_leverage: 20.0,
            ..RiskConfig::default()
        });
        // 5% stop at 10x: liquidation 9.5 away, only 1.9 stops
        let check = rm.check_entry_risk(100.0, 95.0, Side::Long, Tier::A, 10.0);
        assert!(!check.entry_allowed);
        assert!(check.liq_gap_multiplier < 3.0);
        assert!(check.reasons.iter().any(|r| r.contains("liq-gap")));
    }

    #[test]
    fn test_entry_allowed_only_with_liq_gap() {
        let rm = RiskManager::default();
        for leverage in [1.0, 2.0, 3.0, 4.0, 5.0] {
            for stop in [99.0, 97.0, 95.0, 90.0] {
                let check = rm.check_entry_risk(100.0, stop, Side::Long, Tier::B, leverage);
                if check.entry_allowed {
                    assert!(check.liq_gap_multiplier >= 3.0);
                }
            }
        }
    }

    #[test]
    fn test_a_tier_risk_capped_at_two_percent() {
        let rm = RiskManager::new(RiskConfig {
            base_position_size: 10_000.0,
            ..RiskConfig::default()
        });
        let check = rm.check_entry_risk(100.0, 95.0, Side::Long, Tier::A, 3.0);
        assert!(check.entry_allowed);
        assert!(check.risk_usd <= 200.0 + 1e-9);
        assert!((check.position_size_usd - 4_000.0).abs() < 1e-6);
        assert!(!check.warnings.is_empty());
    }

    #[test]
    fn test_default_sizing() {
        let rm = RiskManager::default();
        let check = rm.check_entry_risk(100.0, 95.0, Side::Long, Tier::A, 3.0);
        assert!(check.entry_allowed);
        assert_eq!(check.position_size_usd, 1_000.0);
        assert!((check.risk_usd - 50.0).abs() < 1e-9);
        assert!((check.quantity - 10.0).abs() < 1e-12);
        assert!(check.risk_usd <= 200.0);

        let b = rm.check_entry_risk(100.0, 95.0, Side::Long, Tier::B, 3.0);
        assert_eq!(b.position_size_usd, 500.0);
    }

    #[test]
    fn test_skip_tier_and_excess_leverage_rejected() {
        let rm = RiskManager::default();
        assert!(!rm.check_entry_risk(100.0, 99.0, Side::Long, Tier::Skip, 3.0).entry_allowed);
        assert!(!rm.check_entry_risk(100.0, 99.0, Side::Long, Tier::A, 8.0).entry_allowed);
    }

    #[test]
    fn test_margin_limit() {
        let rm = RiskManager::new(RiskConfig {
            base_position_size: 100_000.0,
            max_risk_per_trade_pct: 100.0,
            ..RiskConfig::default()
        });
        let check = rm.check_entry_risk(100.0, 99.0, Side::Short, Tier::A, 1.0);
        assert!(!check.entry_allowed);
        assert!(check.reasons.iter().any(|r| r.contains("margin")));
    }

    #[test]
    fn test_ongoing_near_stop() {
        let rm = RiskManager::default();
        let far = rm.check_ongoing_risk(103.0, 100.0, 97.0, Side::Long, 3.0);
        assert!(!far.near_stop);
        assert!((far.pnl_pct - 3.0).abs() < 1e-9);

        let near = rm.check_ongoing_risk(97.3, 100.0, 97.0, Side::Long, 3.0);
        assert!(near.near_stop);

        let short = rm.check_ongoing_risk(102.8, 100.0, 103.0, Side::Short, 3.0);
        assert!(short.near_stop);
        assert!(short.pnl_pct < 0.0);
    }
}
