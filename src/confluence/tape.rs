//! Tape filters on the 1s/5s timeframe
//!
//! Flow (CVD z-score), order book imbalance and VWAP proximity.

use serde::{Deserialize, Serialize};

use crate::confluence::features::TimeframeFeatures;
use crate::models::{MicroSnapshot, Side};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    pub cvd_z_min: f64,
    pub obi_long_min: f64,
    pub obi_short_max: f64,
    pub vwap_tolerance_atr: f64, // × ATR(5m)
    pub debounce_n: usize,
    pub debounce_m: usize,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            cvd_z_min: 0.5,
            obi_long_min: 1.25,
            obi_short_max: 0.80,
            vwap_tolerance_atr: 0.02,
            debounce_n: 7,
            debounce_m: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VwapStatus {
    WithinTolerance,
    Reclaimed,
    Lost,
    OutsideTolerance,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapeCheck {
    pub cvd_ok: bool,
    pub obi_ok: bool,
    pub vwap_ok: bool,
    pub cvd_z: Option<f64>,
    pub obi: Option<f64>,
    pub vwap_status: VwapStatus,
}

impl TapeCheck {
    pub fn ratio(&self) -> f64 {
        let passed = [self.cvd_ok, self.obi_ok, self.vwap_ok]
            .iter()
            .filter(|ok| **ok)
            .count();
        passed as f64 / 3.0
    }

    pub fn tape_ok(&self) -> bool {
        self.cvd_ok && self.obi_ok && self.vwap_ok
    }
}

/// VWAP proximity: within tolerance, or the last bar crossed it
pub fn check_vwap_proximity(tape: &TimeframeFeatures, atr_5m: Option<f64>, tolerance_atr: f64) -> VwapStatus {
    let (Some(vwap), Some(prev_vwap), Some(prev_close), Some(atr)) =
        (tape.vwap, tape.prev_vwap, tape.prev_close, atr_5m.filter(|a| *a > 0.0))
    else {
        return VwapStatus::Unavailable;
    };

    if (tape.close - vwap).abs() <= tolerance_atr * atr {
        VwapStatus::WithinTolerance
    } else if prev_close < prev_vwap && tape.close > vwap {
        VwapStatus::Reclaimed
    } else if prev_close > prev_vwap && tape.close < vwap {
        VwapStatus::Lost
    } else {
        VwapStatus::OutsideTolerance
    }
}

pub fn check_tape_filters(
    tape: Option<&TimeframeFeatures>,
    snapshot: Option<&MicroSnapshot>,
    side: Side,
    atr_5m: Option<f64>,
    config: &TapeConfig,
) -> TapeCheck {
    let cvd_z = tape.and_then(|t| t.cvd_z20);
    let cvd_ok = cvd_z.is_some_and(|z| match side {
        Side::Long => z >= config.cvd_z_min,
        Side::Short => z <= -config.cvd_z_min,
    });

    let obi = snapshot.and_then(|s| s.depth_ratio());
    let obi_ok = obi.is_some_and(|ratio| match side {
        Side::Long => ratio >= config.obi_long_min,
        Side::Short => ratio <= config.obi_short_max,
    });

    let vwap_status = tape
        .map(|t| check_vwap_proximity(t, atr_5m, config.vwap_tolerance_atr))
        .unwrap_or(VwapStatus::Unavailable);
    let vwap_ok = matches!(
        vwap_status,
        VwapStatus::WithinTolerance | VwapStatus::Reclaimed | VwapStatus::Lost
    );

    TapeCheck {
        cvd_ok,
        obi_ok,
        vwap_ok,
        cvd_z,
        obi,
        vwap_status,
    }
}

/// n-of-m debounce over the most recent tape passes (oldest first)
pub fn debounce(passes: &[bool], n: usize, m: usize) -> bool {
    if m == 0 || passes.len() < m {
        return false;
    }
    passes[passes.len() - m..].iter().filter(|p| **p).count() >= n
}
