use crate::indicators::atr::atr_series;
use crate::models::Candle;
use serde::{Deserialize, Serialize};

/// Classic pivot levels over a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub s1: f64,
}

/// Pivot levels from the window's high, low and final close
///
/// P = (H + L + C) / 3, R1 = 2P - L, S1 = 2P - H
pub fn pivot_points(candles: &[Candle]) -> Option<PivotLevels> {
    let close = candles.last()?.close;
    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    let pivot = (high + low + close) / 3.0;
    Some(PivotLevels {
        pivot,
        r1: 2.0 * pivot - low,
        s1: 2.0 * pivot - high,
    })
}

/// Cumulative VWAP over typical price (H + L + C) / 3
///
/// None until some volume has traded.
pub fn vwap_series(candles: &[Candle]) -> Vec<Option<f64>> {
    let mut cum_pv = 0.0;
    let mut cum_vol = 0.0;
    candles
        .iter()
        .map(|c| {
            let typical = (c.high + c.low + c.close) / 3.0;
            cum_pv += typical * c.volume;
            cum_vol += c.volume;
            if cum_vol > 0.0 {
                Some(cum_pv / cum_vol)
            } else {
                None
            }
        })
        .collect()
}

/// Break of structure per bar: +1 bullish, -1 bearish, 0 none
///
/// Bullish when the close clears the prior `window`-bar high by
/// `atr_mult` × ATR(14); bearish mirrors against the prior low.
pub fn bos_series(candles: &[Candle], window: usize, atr_mult: f64) -> Vec<i8> {
    let atr = atr_series(candles, 14);
    let mut out = vec![0; candles.len()];
    if window == 0 {
        return out;
    }

    for i in window..candles.len() {
        let Some(atr) = atr[i] else {
            continue;
        };
        let prior = &candles[i - window..i];
        let local_high = prior.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let local_low = prior.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let close = candles[i].close;

        if close > local_high + atr_mult * atr {
            out[i] = 1;
        } else if close < local_low - atr_mult * atr {
            out[i] = -1;
        }
    }
    out
}
