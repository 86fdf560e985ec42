//! Per-timeframe feature extraction for the confluence gates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::indicators::{
    atr_series, bos_series, closes, ema_series, last_zscore, pivot_points, rolling_median,
    rsi_series, tick_rule_cvd, volumes, vwap_series, PivotLevels, EMA_SPANS,
};
use crate::models::{Candle, Timeframe};

/// How many trailing RSI-12 values are kept for hold checks
const RSI_TAIL: usize = 5;

/// Latest readings for one timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeFeatures {
    pub timeframe: Timeframe,
    pub bars: usize,
    pub close: f64,
    pub prev_close: Option<f64>,
    pub ema: Option<[f64; 4]>,  // EMA_SPANS order, once `bars` >= slowest span
    pub rsi12_tail: Vec<f64>,  // Oldest first, contiguous valid values only
    pub atr14: Option<f64>,
    pub bos: i8,
    pub volume_ratio: Option<f64>, // Last volume / 50-bar median
    pub vwap: Option<f64>,
    pub prev_vwap: Option<f64>,
    pub pivot: Option<PivotLevels>,
    pub cvd_z20: Option<f64>,
    pub flow: Vec<f64>, // Tick-rule cumulative flow
}

impl TimeframeFeatures {
    pub fn rsi12(&self) -> Option<f64> {
        self.rsi12_tail.last().copied()
    }
}

/// Extract features from a timeframe's candles; None when empty
pub fn extract_features(timeframe: Timeframe, candles: &[Candle]) -> Option<TimeframeFeatures> {
    let last = candles.last()?;
    let closes = closes(candles);
    let volumes = volumes(candles);
    let n = candles.len();

    let slowest = EMA_SPANS[EMA_SPANS.len() - 1];
    let ema = (n >= slowest).then(|| {
        EMA_SPANS.map(|span| ema_series(&closes, span).last().copied().unwrap_or(last.close))
    });

    let rsi = rsi_series(&closes, 12);
    let mut rsi12_tail: Vec<f64> = rsi
        .iter()
        .rev()
        .take(RSI_TAIL)
        .map_while(|v| *v)
        .collect();
    rsi12_tail.reverse();

    let volume_ratio = rolling_median(&volumes, 50)
        .last()
        .copied()
        .flatten()
        .filter(|m| *m > 0.0)
        .map(|median| last.volume / median);

    let vwap = vwap_series(candles);
    let flow = tick_rule_cvd(candles);

    Some(TimeframeFeatures {
        timeframe,
        bars: n,
        close: last.close,
        prev_close: n.checked_sub(2).map(|i| candles[i].close),
        ema,
        rsi12_tail,
        atr14: atr_series(candles, 14).last().copied().flatten(),
        bos: bos_series(candles, 20, 0.1).last().copied().unwrap_or(0),
        volume_ratio,
        vwap: vwap.last().copied().flatten(),
        prev_vwap: n.checked_sub(2).and_then(|i| vwap[i]),
        pivot: pivot_points(candles),
        cvd_z20: last_zscore(&flow, 20),
        flow,
    })
}

/// Features for every timeframe that had data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    frames: BTreeMap<Timeframe, TimeframeFeatures>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_candles(&mut self, timeframe: Timeframe, candles: &[Candle]) {
        if let Some(features) = extract_features(timeframe, candles) {
            self.frames.insert(timeframe, features);
        }
    }

    pub fn with_candles(mut self, timeframe: Timeframe, candles: &[Candle]) -> Self {
        self.insert_candles(timeframe, candles);
        self
    }

    pub fn get(&self, timeframe: Timeframe) -> Option<&TimeframeFeatures> {
        self.frames.get(&timeframe)
    }

    /// Fastest available tape timeframe (1s, then 5s)
    pub fn tape(&self) -> Option<&TimeframeFeatures> {
        self.get(Timeframe::S1).or_else(|| self.get(Timeframe::S5))
    }

    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.frames.keys().copied()
    }
}
