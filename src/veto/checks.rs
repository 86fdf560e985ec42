//! Individual veto rules
//!
//! Each check is a pure function returning a `VetoCheck`. A check whose
//! inputs are unavailable passes with no value; the microstructure gate and
//! order placement already fail closed on a missing book.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::last_zscore;
use crate::models::{MicroSnapshot, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoKind {
    FlowCliff,
    Spread,
    Depth,
    MarkLast,
    Funding,
    Adl,
    LiquidationShock,
}

impl fmt::Display for VetoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VetoKind::FlowCliff => "flow_cliff",
            VetoKind::Spread => "spread",
            VetoKind::Depth => "depth",
            VetoKind::MarkLast => "mark_last",
            VetoKind::Funding => "funding",
            VetoKind::Adl => "adl",
            VetoKind::LiquidationShock => "liquidation_shock",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VetoCheck {
    pub kind: VetoKind,
    pub veto: bool,
    pub value: Option<f64>,
    pub reason: Option<String>,
}

impl VetoCheck {
    fn pass(kind: VetoKind, value: Option<f64>) -> Self {
        Self {
            kind,
            veto: false,
            value,
            reason: None,
        }
    }

    fn veto(kind: VetoKind, value: f64, reason: String) -> Self {
        Self {
            kind,
            veto: true,
            value: Some(value),
            reason: Some(reason),
        }
    }
}

/// Auto-deleverage queue warning level published by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdlStatus {
    Ok,
    Warning,
    High,
    Critical,
}

impl AdlStatus {
    pub fn is_warning(&self) -> bool {
        !matches!(self, AdlStatus::Ok)
    }
}

/// Flow cliff: z-score of the cumulative flow series (OBV/CVD) over
/// `window` bars at or beyond `z_threshold` against the trade
pub fn check_flow_cliff(flow: &[f64], side: Side, z_threshold: f64, window: usize) -> VetoCheck {
    let Some(z) = last_zscore(flow, window) else {
        return VetoCheck::pass(VetoKind::FlowCliff, None);
    };
    match side {
        Side::Long if z <= -z_threshold => VetoCheck::veto(
            VetoKind::FlowCliff,
            z,
            format!("flow cliff against long: z={z:.2}"),
        ),
        Side::Short if z >= z_threshold => VetoCheck::veto(
            VetoKind::FlowCliff,
            z,
            format!("flow cliff against short: z={z:.2}"),
        ),
        _ => VetoCheck::pass(VetoKind::FlowCliff, Some(z)),
    }
}

/// Spread in percent (bps / 100) above `max_spread_pct`
pub fn check_spread(snapshot: Option<&MicroSnapshot>, max_spread_pct: f64) -> VetoCheck {
    let Some(snap) = snapshot else {
        return VetoCheck::pass(VetoKind::Spread, None);
    };
    let spread_pct = snap.spread_bps / 100.0;
    if spread_pct > max_spread_pct {
        VetoCheck::veto(
            VetoKind::Spread,
            spread_pct,
            format!("spread too wide: {spread_pct:.3}% > {max_spread_pct:.3}%"),
        )
    } else {
        VetoCheck::pass(VetoKind::Spread, Some(spread_pct))
    }
}

/// Total book depth against a baseline, or an absolute floor without one
pub fn check_depth(
    snapshot: Option<&MicroSnapshot>,
    baseline_depth: Option<f64>,
    min_depth_ratio: f64,
    min_absolute_depth: f64,
) -> VetoCheck {
    let Some(snap) = snapshot else {
        return VetoCheck::pass(VetoKind::Depth, None);
    };
    let total = snap.bid_depth + snap.ask_depth;

    match baseline_depth.filter(|b| *b > 0.0) {
        Some(baseline) => {
            let ratio = total / baseline;
            if ratio < min_depth_ratio {
                VetoCheck::veto(
                    VetoKind::Depth,
                    ratio,
                    format!("depth collapsed to {:.0}% of baseline", ratio * 100.0),
                )
            } else {
                VetoCheck::pass(VetoKind::Depth, Some(ratio))
            }
        }
        None if total < min_absolute_depth => VetoCheck::veto(
            VetoKind::Depth,
            total,
            format!("depth {total:.0} below floor {min_absolute_depth:.0}"),
        ),
        None => VetoCheck::pass(VetoKind::Depth, Some(total)),
    }
}

/// Mark/last deviation in percent at or above `max_deviation_pct`
pub fn check_mark_last(
    mark_price: Option<f64>,
    last_price: Option<f64>,
    max_deviation_pct: f64,
) -> VetoCheck {
    let (Some(mark), Some(last)) = (mark_price, last_price) else {
        return VetoCheck::pass(VetoKind::MarkLast, None);
    };
    if last <= 0.0 {
        return VetoCheck::pass(VetoKind::MarkLast, None);
    }
    let deviation_pct = (mark - last).abs() / last * 100.0;
    if deviation_pct >= max_deviation_pct {
        VetoCheck::veto(
            VetoKind::MarkLast,
            deviation_pct,
            format!("mark/last deviation {deviation_pct:.3}%"),
        )
    } else {
        VetoCheck::pass(VetoKind::MarkLast, Some(deviation_pct))
    }
}

/// |funding| above `max_multiplier` × |median funding|
pub fn check_funding(
    current_funding: Option<f64>,
    median_funding: Option<f64>,
    max_multiplier: f64,
) -> VetoCheck {
    let (Some(current), Some(median)) = (current_funding, median_funding) else {
        return VetoCheck::pass(VetoKind::Funding, None);
    };
    if median == 0.0 {
        return VetoCheck::pass(VetoKind::Funding, None);
    }
    let ratio = current.abs() / median.abs();
    if ratio > max_multiplier {
        VetoCheck::veto(
            VetoKind::Funding,
            ratio,
            format!("funding {ratio:.1}x median"),
        )
    } else {
        VetoCheck::pass(VetoKind::Funding, Some(ratio))
    }
}

pub fn check_adl(status: Option<AdlStatus>) -> VetoCheck {
    match status {
        Some(status) if status.is_warning() => VetoCheck {
            kind: VetoKind::Adl,
            veto: true,
            value: None,
            reason: Some(format!("ADL warning: {status:?}")),
        },
        _ => VetoCheck::pass(VetoKind::Adl, None),
    }
}

/// Liquidation volume at or above `shock_multiplier` × baseline
pub fn check_liquidation_shock(
    current_volume: Option<f64>,
    baseline_volume: Option<f64>,
    shock_multiplier: f64,
) -> VetoCheck {
    let (Some(current), Some(baseline)) = (current_volume, baseline_volume) else {
        return VetoCheck::pass(VetoKind::LiquidationShock, None);
    };
    if baseline <= 0.0 {
        return VetoCheck::pass(VetoKind::LiquidationShock, None);
    }
    let ratio = current / baseline;
    if ratio >= shock_multiplier {
        VetoCheck::veto(
            VetoKind::LiquidationShock,
            ratio,
            format!("liquidation shock {ratio:.1}x baseline"),
        )
    } else {
        VetoCheck::pass(VetoKind::LiquidationShock, Some(ratio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(spread_bps: f64, bid_depth: f64, ask_depth: f64) -> MicroSnapshot {
        MicroSnapshot {
            timestamp: Utc::now(),
            best_bid: 100.0,
            best_ask: 100.05,
            spread_bps,
            bid_depth,
            ask_depth,
            ladder_imbalance: 0.0,
            cvd: 0.0,
            cvd_slope: 0.0,
            trade_volume: 0.0,
            ok: true,
        }
    }

    #[test]
    fn test_flow_cliff_against_long() {
        let mut flow: Vec<f64> = vec![100.0, 101.0, 99.0, 100.0, 101.0, 99.0, 100.0, 101.0, 99.0];
        flow.push(80.0);
        let check = check_flow_cliff(&flow, Side::Long, 2.0, 10);
        assert!(check.veto);
        // Same dump favours a short
        assert!(!check_flow_cliff(&flow, Side::Short, 2.0, 10).veto);
    }

    #[test]
    fn test_flow_cliff_short_history_passes() {
        let check = check_flow_cliff(&[1.0, 2.0], Side::Long, 2.0, 10);
        assert!(!check.veto);
        assert_eq!(check.value, None);
    }

    #[test]
    fn test_spread_threshold() {
        assert!(!check_spread(Some(&snapshot(10.0, 1.0, 1.0)), 0.10).veto);
        assert!(check_spread(Some(&snapshot(10.5, 1.0, 1.0)), 0.10).veto);
        assert!(!check_spread(None, 0.10).veto);
    }

    #[test]
    fn test_depth_baseline_and_floor() {
        let thin = snapshot(1.0, 20_000.0, 20_000.0);
        assert!(check_depth(Some(&thin), Some(100_000.0), 0.5, 100_000.0).veto);
        assert!(!check_depth(Some(&thin), Some(60_000.0), 0.5, 100_000.0).veto);
        assert!(check_depth(Some(&thin), None, 0.5, 100_000.0).veto);

        let deep = snapshot(1.0, 80_000.0, 80_000.0);
        assert!(!check_depth(Some(&deep), None, 0.5, 100_000.0).veto);
    }

    #[test]
    fn test_mark_last_deviation() {
        assert!(check_mark_last(Some(100.16), Some(100.0), 0.15).veto);
        assert!(!check_mark_last(Some(100.10), Some(100.0), 0.15).veto);
        assert!(!check_mark_last(None, Some(100.0), 0.15).veto);
    }

    #[test]
    fn test_funding_spike() {
        assert!(check_funding(Some(-0.0004), Some(0.0001), 3.0).veto);
        assert!(!check_funding(Some(0.00025), Some(0.0001), 3.0).veto);
        assert!(!check_funding(Some(0.00025), Some(0.0), 3.0).veto);
    }

    #[test]
    fn test_adl_warning_levels() {
        assert!(check_adl(Some(AdlStatus::Warning)).veto);
        assert!(check_adl(Some(AdlStatus::Critical)).veto);
        assert!(!check_adl(Some(AdlStatus::Ok)).veto);
        assert!(!check_adl(None).veto);
    }

    #[test]
    fn test_liquidation_shock() {
        assert!(check_liquidation_shock(Some(1000.0), Some(100.0), 10.0).veto);
        assert!(!check_liquidation_shock(Some(900.0), Some(100.0), 10.0).veto);
    }
}
