//! Order book gate consulted before a breakout bar may confirm a candidate
//!
//! Fails closed: a missing, stale or unhealthy snapshot never passes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MicroSnapshot, Side};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroGateConfig {
    pub spread_bps_max: f64,
    pub depth_min: Option<f64>,     // Per side, disabled when None
    pub imbalance_threshold: f64,   // |ladder imbalance| needed in trade direction
    pub cvd_slope_min: Option<f64>, // Disabled when None
    pub max_snapshot_age_secs: i64,
    pub max_bonus: f64,
}

impl Default for MicroGateConfig {
    fn default() -> Self {
        Self {
            spread_bps_max: 10.0,
            depth_min: None,
            imbalance_threshold: 0.15,
            cvd_slope_min: None,
            max_snapshot_age_secs: 10,
            max_bonus: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MicroVeto {
    NoSnapshot,
    Stale { age_secs: i64 },
    Unhealthy,
    Spread { spread_bps: f64 },
    Depth { bid_depth: f64, ask_depth: f64 },
    Imbalance { imbalance: f64 },
    CvdSlope { slope: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroGateResult {
    pub ok: bool,
    pub vetoes: Vec<MicroVeto>,
    pub bonus: f64, // min(max_bonus, |imbalance|) when ok
}

impl MicroGateResult {
    fn rejected(veto: MicroVeto) -> Self {
        Self {
            ok: false,
            vetoes: vec![veto],
            bonus: 0.0,
        }
    }
}

/// Evaluate the microstructure gate for `side`
pub fn micro_ok(
    side: Side,
    snapshot: Option<&MicroSnapshot>,
    config: &MicroGateConfig,
    now: DateTime<Utc>,
) -> MicroGateResult {
    let Some(snap) = snapshot else {
        return MicroGateResult::rejected(MicroVeto::NoSnapshot);
    };
    if !snap.is_fresh(now, Duration::seconds(config.max_snapshot_age_secs)) {
        return MicroGateResult::rejected(MicroVeto::Stale {
            age_secs: snap.age(now).num_seconds(),
        });
    }
    if !snap.ok {
        return MicroGateResult::rejected(MicroVeto::Unhealthy);
    }

    let mut vetoes = Vec::new();

    if snap.spread_bps >= config.spread_bps_max {
        vetoes.push(MicroVeto::Spread {
            spread_bps: snap.spread_bps,
        });
    }

    if let Some(depth_min) = config.depth_min {
        if snap.bid_depth < depth_min || snap.ask_depth < depth_min {
            vetoes.push(MicroVeto::Depth {
                bid_depth: snap.bid_depth,
                ask_depth: snap.ask_depth,
            });
        }
    }

    let imbalance = snap.ladder_imbalance;
    let imbalance_ok = match side {
        Side::Long => imbalance > config.imbalance_threshold,
        Side::Short => imbalance < -config.imbalance_threshold,
    };
    if !imbalance_ok {
        vetoes.push(MicroVeto::Imbalance { imbalance });
    }

    if let Some(slope_min) = config.cvd_slope_min {
        let slope_ok = match side {
            Side::Long => snap.cvd_slope >= slope_min,
            Side::Short => snap.cvd_slope <= -slope_min,
        };
        if !slope_ok {
            vetoes.push(MicroVeto::CvdSlope {
                slope: snap.cvd_slope,
            });
        }
    }

    let ok = vetoes.is_empty();
    let bonus = if ok {
        config.max_bonus.min(imbalance.abs())
    } else {
        0.0
    };

    MicroGateResult { ok, vetoes, bonus }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(now: DateTime<Utc>, spread_bps: f64, imbalance: f64) -> MicroSnapshot {
        MicroSnapshot {
            timestamp: now,
            best_bid: 99.99,
            best_ask: 100.01,
            spread_bps,
            bid_depth: 150_000.0,
            ask_depth: 100_000.0,
            ladder_imbalance: imbalance,
            cvd: 0.0,
            cvd_slope: 1.0,
            trade_volume: 10.0,
            ok: true,
        }
    }

    #[test]
    fn test_passes_with_bid_pressure() {
        let now = Utc::now();
        let snap = snapshot(now, 8.0, 0.2);
        let result = micro_ok(Side::Long, Some(&snap), &MicroGateConfig::default(), now);
        assert!(result.ok);
        assert!((result.bonus - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_bonus_capped_by_imbalance() {
        let now = Utc::now();
        let snap = snapshot(now, 2.0, -0.16);
        let result = micro_ok(Side::Short, Some(&snap), &MicroGateConfig::default(), now);
        assert!(result.ok);
        assert!((result.bonus - 0.10).abs() < 1e-12);

        let snap = snapshot(now, 2.0, 0.0);
        let config = MicroGateConfig {
            imbalance_threshold: -1.0,
            ..MicroGateConfig::default()
        };
        let result = micro_ok(Side::Long, Some(&snap), &config, now);
        assert_eq!(result.bonus, 0.0);
    }

    #[test]
    fn test_missing_snapshot_fails_closed() {
        let result = micro_ok(Side::Long, None, &MicroGateConfig::default(), Utc::now());
        assert!(!result.ok);
        assert_eq!(result.vetoes, vec![MicroVeto::NoSnapshot]);
    }

    #[test]
    fn test_stale_snapshot_fails_closed() {
        let now = Utc::now();
        let snap = snapshot(now - Duration::seconds(30), 2.0, 0.5);
        let result = micro_ok(Side::Long, Some(&snap), &MicroGateConfig::default(), now);
        assert!(!result.ok);
        assert!(matches!(result.vetoes[0], MicroVeto::Stale { .. }));
    }

    #[test]
    fn test_wide_spread_and_wrong_imbalance() {
        let now = Utc::now();
        let snap = snapshot(now, 12.0, 0.3);
        let result = micro_ok(Side::Short, Some(&snap), &MicroGateConfig::default(), now);
        assert!(!result.ok);
        assert_eq!(result.vetoes.len(), 2);
    }

    #[test]
    fn test_optional_depth_floor() {
        let now = Utc::now();
        let snap = snapshot(now, 2.0, 0.3);
        let config = MicroGateConfig {
            depth_min: Some(200_000.0),
            ..MicroGateConfig::default()
        };
        let result = micro_ok(Side::Long, Some(&snap), &config, now);
        assert!(matches!(result.vetoes[0], MicroVeto::Depth { .. }));
    }
}
