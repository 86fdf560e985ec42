//! Context leg gates on the 15m and 1h timeframes
//!
//! EMA alignment, RSI-12 oscillator agreement and pivot/VWAP structure.

use serde::{Deserialize, Serialize};

use crate::confluence::features::TimeframeFeatures;
use crate::models::Side;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaAlignment {
    pub aligned_pairs: usize,
    pub ratio: f64, // aligned_pairs / 3
    pub aligned: bool,
}

impl EmaAlignment {
    fn unavailable() -> Self {
        Self {
            aligned_pairs: 0,
            ratio: 0.0,
            aligned: false,
        }
    }
}

/// Count adjacent EMA pairs (5>9, 9>21, 21>38 for longs) ordered with the trade
pub fn check_ema_alignment(
    features: Option<&TimeframeFeatures>,
    side: Side,
    min_aligned_pairs: usize,
) -> EmaAlignment {
    let Some(ema) = features.and_then(|f| f.ema) else {
        return EmaAlignment::unavailable();
    };
    let pairs = ema.len() - 1;
    let aligned_pairs = ema
        .windows(2)
        .filter(|w| match side {
            Side::Long => w[0] > w[1],
            Side::Short => w[0] < w[1],
        })
        .count();

    EmaAlignment {
        aligned_pairs,
        ratio: aligned_pairs as f64 / pairs as f64,
        aligned: aligned_pairs >= min_aligned_pairs,
    }
}

/// RSI-12 not pinned against the trade: longs need >= `oversold`,
/// shorts need <= `overbought`
pub fn check_oscillator(
    features: Option<&TimeframeFeatures>,
    side: Side,
    oversold: f64,
    overbought: f64,
) -> bool {
    match features.and_then(|f| f.rsi12()) {
        Some(rsi) => match side {
            Side::Long => rsi >= oversold,
            Side::Short => rsi <= overbought,
        },
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotStructure {
    pub pivot_ok: bool,
    pub vwap_ok: bool,
    pub structure_ok: bool,
}

/// Close on the trade side of the window pivot or of VWAP
pub fn check_pivot_structure(features: Option<&TimeframeFeatures>, side: Side) -> PivotStructure {
    let Some(f) = features else {
        return PivotStructure {
            pivot_ok: false,
            vwap_ok: false,
            structure_ok: false,
        };
    };
    let beyond = |level: f64| match side {
        Side::Long => f.close > level,
        Side::Short => f.close < level,
    };
    let pivot_ok = f.pivot.is_some_and(|p| beyond(p.pivot));
    let vwap_ok = f.vwap.is_some_and(beyond);

    PivotStructure {
        pivot_ok,
        vwap_ok,
        structure_ok: pivot_ok || vwap_ok,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayType {
    Continuation, // Both timeframes aligned and structure holds
    Deviation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextGates {
    pub ema_15m: EmaAlignment,
    pub ema_1h: EmaAlignment,
    pub oscillator_15m: bool,
    pub oscillator_1h: bool,
    pub structure: PivotStructure,
    pub play_type: PlayType,
}

impl ContextGates {
    pub fn ema_ratio(&self) -> f64 {
        (self.ema_15m.ratio + self.ema_1h.ratio) / 2.0
    }

    pub fn oscillator_ok(&self) -> bool {
        self.oscillator_15m && self.oscillator_1h
    }
}

pub fn evaluate_context(
    f15m: Option<&TimeframeFeatures>,
    f1h: Option<&TimeframeFeatures>,
    side: Side,
    min_aligned_pairs: usize,
    oversold: f64,
    overbought: f64,
) -> ContextGates {
    let ema_15m = check_ema_alignment(f15m, side, min_aligned_pairs);
    let ema_1h = check_ema_alignment(f1h, side, min_aligned_pairs);
    let structure = check_pivot_structure(f15m, side);

    let play_type = if ema_15m.aligned && ema_1h.aligned && structure.structure_ok {
        PlayType::Continuation
    } else {
        PlayType::Deviation
    };

    ContextGates {
        oscillator_15m: check_oscillator(f15m, side, oversold, overbought),
        oscillator_1h: check_oscillator(f1h, side, oversold, overbought),
        ema_15m,
        ema_1h,
        structure,
        play_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confluence::features::extract_features;
    use crate::models::{Candle, Timeframe};
    use chrono::Utc;

    fn trend(n: usize, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = 100.0 + step * i as f64;
                Candle {
                    timestamp: Utc::now() + chrono::Duration::minutes(15 * i as i64),
                    open: close - step / 2.0,
                    high: close.max(close - step) + 0.2,
                    low: close.min(close - step) - 0.2,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_uptrend_aligns_long_only() {
        let f = extract_features(Timeframe::M15, &trend(60, 0.5)).unwrap();
        let long = check_ema_alignment(Some(&f), Side::Long, 3);
        assert!(long.aligned);
        assert_eq!(long.ratio, 1.0);

        let short = check_ema_alignment(Some(&f), Side::Short, 3);
        assert!(!short.aligned);
        assert_eq!(short.aligned_pairs, 0);
    }

    #[test]
    fn test_missing_frame_gets_no_credit() {
        assert_eq!(check_ema_alignment(None, Side::Long, 3).ratio, 0.0);
        assert!(!check_oscillator(None, Side::Long, 30.0, 70.0));
        assert!(!check_pivot_structure(None, Side::Long).structure_ok);
    }

    #[test]
    fn test_oscillator_extremes() {
        let down = extract_features(Timeframe::M15, &trend(60, -0.5)).unwrap();
        // RSI 0 in a straight selloff: too stretched to buy, fine to sell
        assert!(!check_oscillator(Some(&down), Side::Long, 30.0, 70.0));
        assert!(check_oscillator(Some(&down), Side::Short, 30.0, 70.0));
    }

    #[test]
    fn test_continuation_play() {
        let f15 = extract_features(Timeframe::M15, &trend(60, 0.5)).unwrap();
        let f1h = extract_features(Timeframe::H1, &trend(60, 2.0)).unwrap();
        let gates = evaluate_context(Some(&f15), Some(&f1h), Side::Long, 3, 30.0, 70.0);
        assert_eq!(gates.play_type, PlayType::Continuation);
        assert!(gates.structure.structure_ok);
        assert_eq!(gates.ema_ratio(), 1.0);

        let gates = evaluate_context(Some(&f15), None, Side::Long, 3, 30.0, 70.0);
        assert_eq!(gates.play_type, PlayType::Deviation);
        assert_eq!(gates.ema_ratio(), 0.5);
    }
}
