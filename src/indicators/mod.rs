// Technical indicators module
// Per-bar series for ATR, RSI, EMA, Bollinger width, volume and OBV statistics

pub mod atr;
pub mod bollinger;
pub mod market_analysis;
pub mod moving_average;
pub mod rsi;
pub mod statistics;
pub mod volume;

pub use atr::{atr_series, calculate_atr, true_ranges};
pub use bollinger::bb_width_series;
pub use market_analysis::{bos_series, pivot_points, vwap_series, PivotLevels};
pub use moving_average::{calculate_ema, calculate_sma, ema_series};
pub use rsi::{calculate_rsi, rsi_series};
pub use statistics::{last_zscore, percentile_rank_series, rolling_median, rolling_zscore};
pub use volume::{closes, obv_series, tick_rule_cvd, volumes};

use crate::models::Candle;

/// EMA spans used for trend alignment, fastest first
pub const EMA_SPANS: [usize; 4] = [5, 9, 21, 38];

/// Indicator series aligned bar-for-bar with the candles they were built from
///
/// Recomputed every cycle. `None` marks warm-up bars.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    pub atr14: Vec<Option<f64>>,
    pub atr5: Vec<Option<f64>>,
    pub rsi14: Vec<Option<f64>>,
    pub rsi12: Vec<Option<f64>>,
    pub ema: [Vec<Option<f64>>; 4], // EMA_SPANS order
    pub bb_width: Vec<Option<f64>>,
    pub bb_width_pct: Vec<Option<f64>>,
    pub volume_z: Vec<Option<f64>>,
    pub obv: Vec<f64>,
    pub obv_z: Vec<Option<f64>>,
    pub volume_median: Vec<Option<f64>>,
}

impl IndicatorSet {
    pub fn compute(candles: &[Candle]) -> Self {
        let closes = closes(candles);
        let volumes = volumes(candles);
        let obv = obv_series(candles);
        let bb_width = bb_width_series(&closes, 20, 2.0);
        let bb_width_pct = percentile_rank_series(&bb_width, 90);

        let ema = EMA_SPANS.map(|span| {
            ema_series(&closes, span)
                .into_iter()
                .enumerate()
                .map(|(i, v)| if i + 1 >= span { Some(v) } else { None })
                .collect()
        });

        Self {
            atr14: atr_series(candles, 14),
            atr5: atr_series(candles, 5),
            rsi14: rsi_series(&closes, 14),
            rsi12: rsi_series(&closes, 12),
            ema,
            bb_width,
            bb_width_pct,
            volume_z: rolling_zscore(&volumes, 50),
            obv_z: rolling_zscore(&obv, 10),
            obv,
            volume_median: rolling_median(&volumes, 50),
        }
    }

    pub fn len(&self) -> usize {
        self.obv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obv.is_empty()
    }
}

/// Value at `index`, flattening out-of-range and warm-up bars
pub fn value_at(series: &[Option<f64>], index: usize) -> Option<f64> {
    series.get(index).copied().flatten()
}
