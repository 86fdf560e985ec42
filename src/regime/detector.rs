/// Volatility regime detector using Bollinger Band width
///
/// Classifies the 5m market by where the current BB width sits within its
/// recent history:
/// - Squeeze: width percentile <= 30 → wider targets, slower confirmation
/// - Wide: width percentile >= 70 → earlier trigger
/// - Normal: everything in between

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::{bb_width_series, closes, percentile_rank_series};
use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Squeeze, // Compressed volatility, expansion expected
    Normal,
    Wide, // Already expanded
}

impl Regime {
    /// Trade management parameters for this regime
    pub fn params(&self) -> RegimeParams {
        match self {
            Regime::Squeeze => RegimeParams {
                tp1_r: 1.0,
                tp2_r: 2.5,
                tp3_r: 4.0,
                trigger_atr_mult: 0.50,
                confirmation_bars: 2,
                max_hold_hours: 12,
            },
            Regime::Normal => RegimeParams {
                tp1_r: 1.0,
                tp2_r: 2.0,
                tp3_r: 3.0,
                trigger_atr_mult: 0.50,
                confirmation_bars: 1,
                max_hold_hours: 24,
            },
            Regime::Wide => RegimeParams {
                tp1_r: 1.0,
                tp2_r: 2.0,
                tp3_r: 3.0,
                trigger_atr_mult: 0.35,
                confirmation_bars: 1,
                max_hold_hours: 24,
            },
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Squeeze => write!(f, "squeeze"),
            Regime::Normal => write!(f, "normal"),
            Regime::Wide => write!(f, "wide"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeParams {
    pub tp1_r: f64,
    pub tp2_r: f64,
    pub tp3_r: f64,
    pub trigger_atr_mult: f64, // Breakout trigger offset in ATR units
    pub confirmation_bars: usize,
    pub max_hold_hours: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeResult {
    pub regime: Regime,
    pub bbwidth: f64,
    pub bbwidth_pct: f64,
    pub params: RegimeParams,
}

impl RegimeResult {
    /// Neutral result used when history is too short to classify
    pub fn fallback() -> Self {
        Self {
            regime: Regime::Normal,
            bbwidth: 0.0,
            bbwidth_pct: 50.0,
            params: Regime::Normal.params(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeDetector {
    pub bb_period: usize,
    pub bb_k: f64,
    pub percentile_window: usize,
    pub squeeze_threshold: f64,
    pub wide_threshold: f64,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_k: 2.0,
            percentile_window: 90, // ~7.5h of 5m bars
            squeeze_threshold: 30.0,
            wide_threshold: 70.0,
        }
    }
}

impl RegimeDetector {
    pub fn new(
        bb_period: usize,
        bb_k: f64,
        percentile_window: usize,
        squeeze_threshold: f64,
        wide_threshold: f64,
    ) -> Self {
        Self {
            bb_period,
            bb_k,
            percentile_window,
            squeeze_threshold,
            wide_threshold,
        }
    }

    /// Minimum bars needed before a percentile can be ranked
    pub fn min_bars(&self) -> usize {
        self.bb_period + self.percentile_window - 1
    }

    pub fn classify(&self, bbwidth_pct: f64) -> Regime {
        if bbwidth_pct <= self.squeeze_threshold {
            Regime::Squeeze
        } else if bbwidth_pct >= self.wide_threshold {
            Regime::Wide
        } else {
            Regime::Normal
        }
    }

    /// Detect the regime at the final bar
    ///
    /// Returns None if insufficient data for detection
    pub fn detect_regime(&self, candles: &[Candle]) -> Option<RegimeResult> {
        if candles.len() < self.min_bars() {
            return None;
        }

        let closes = closes(candles);
        let widths = bb_width_series(&closes, self.bb_period, self.bb_k);
        let ranks = percentile_rank_series(&widths, self.percentile_window);

        let bbwidth = widths.last().copied().flatten()?;
        let bbwidth_pct = ranks.last().copied().flatten()?;
        let regime = self.classify(bbwidth_pct);

        tracing::debug!(%regime, bbwidth, bbwidth_pct, "regime detected");

        Some(RegimeResult {
            regime,
            bbwidth,
            bbwidth_pct,
            params: regime.params(),
        })
    }

    /// Like `detect_regime`, falling back to normal parameters
    pub fn detect_or_default(&self, candles: &[Candle]) -> RegimeResult {
        self.detect_regime(candles)
            .unwrap_or_else(RegimeResult::fallback)
    }
}
