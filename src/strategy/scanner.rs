use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators::{value_at, IndicatorSet};
use crate::models::{Candidate, Candle, Side};
use crate::strategy::InvalidationCache;

/// Configuration for extremum scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub extrema_window: usize,    // Bars on each side a swing must dominate
    pub atr_min: f64,             // Minimum ATR14 at the extremum
    pub volz_min: f64,            // Minimum volume z-score (50 bars)
    pub bbw_min: f64,             // Minimum Bollinger width
    pub obv_veto_threshold: f64,  // OBV z(10) cliff against direction
    pub min_bars: usize,          // Window size required before scanning
    pub candidate_timeout_minutes: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extrema_window: 12,
            atr_min: 0.6,
            volz_min: 0.5,
            bbw_min: 0.005,
            obv_veto_threshold: 2.0,
            min_bars: 50,
            candidate_timeout_minutes: Candidate::DEFAULT_TIMEOUT_MINUTES,
        }
    }
}

/// Why a swing bar did not become a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRejection {
    CoolingDown,
    IndicatorsUnavailable,
    AtrTooLow,
    VolumeTooLow,
    BandsTooNarrow,
    ObvCliff,
}

/// True when `low[i]` is strictly below every other low within ±`window`
pub fn is_local_min(candles: &[Candle], i: usize, window: usize) -> bool {
    is_strict_extremum(candles, i, window, |c| c.low, |a, b| a < b)
}

/// True when `high[i]` is strictly above every other high within ±`window`
pub fn is_local_max(candles: &[Candle], i: usize, window: usize) -> bool {
    is_strict_extremum(candles, i, window, |c| c.high, |a, b| a > b)
}

fn is_strict_extremum(
    candles: &[Candle],
    i: usize,
    window: usize,
    value: impl Fn(&Candle) -> f64,
    beats: impl Fn(f64, f64) -> bool,
) -> bool {
    if window == 0 || i < window || i + window >= candles.len() {
        return false;
    }
    let pivot = value(&candles[i]);
    (i - window..=i + window)
        .filter(|&j| j != i)
        .all(|j| beats(pivot, value(&candles[j])))
}

pub struct CandidateScanner {
    config: ScannerConfig,
}

impl Default for CandidateScanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

impl CandidateScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Find the most recent qualifying swing
    ///
    /// Walks backward from the newest bar that has a full right-hand window,
    /// at most `extrema_window` bars deep, and returns the first extremum that
    /// passes the coarse gate and is not cooling down. Older swings have
    /// already played out. Returns None on short windows.
    pub fn scan(
        &self,
        candles: &[Candle],
        indicators: &IndicatorSet,
        cache: &InvalidationCache,
        now: DateTime<Utc>,
    ) -> Option<Candidate> {
        let n = self.config.extrema_window;
        if candles.len() < self.config.min_bars.max(2 * n + 1) || indicators.len() != candles.len() {
            return None;
        }

        let newest = candles.len() - 1 - n;
        let oldest = newest.saturating_sub(n).max(n);
        for i in (oldest..=newest).rev() {
            let side = if is_local_min(candles, i, n) {
                Side::Long
            } else if is_local_max(candles, i, n) {
                Side::Short
            } else {
                continue;
            };

            match self.evaluate_bar(indicators, i, side, cache, now) {
                Ok(()) => {
                    let extremum_price = match side {
                        Side::Long => candles[i].low,
                        Side::Short => candles[i].high,
                    };
                    tracing::info!(%side, bar_index = i, extremum_price, "candidate detected");
                    return Some(Candidate {
                        side,
                        extremum_price,
                        bar_index: i,
                        bar_timestamp: candles[i].timestamp,
                        created_at: now,
                        timeout_minutes: self.config.candidate_timeout_minutes,
                    });
                }
                Err(reason) => {
                    tracing::debug!(%side, bar_index = i, ?reason, "extremum rejected");
                }
            }
        }
        None
    }

    /// Coarse gate for a swing bar
    pub fn evaluate_bar(
        &self,
        indicators: &IndicatorSet,
        i: usize,
        side: Side,
        cache: &InvalidationCache,
        now: DateTime<Utc>,
    ) -> Result<(), ScanRejection> {
        if cache.contains(i, now) {
            return Err(ScanRejection::CoolingDown);
        }

        let (Some(atr), Some(vol_z), Some(bbw)) = (
            value_at(&indicators.atr14, i),
            value_at(&indicators.volume_z, i),
            value_at(&indicators.bb_width, i),
        ) else {
            return Err(ScanRejection::IndicatorsUnavailable);
        };

        if atr < self.config.atr_min {
            return Err(ScanRejection::AtrTooLow);
        }
        if vol_z < self.config.volz_min {
            return Err(ScanRejection::VolumeTooLow);
        }
        if bbw < self.config.bbw_min {
            return Err(ScanRejection::BandsTooNarrow);
        }

        // Missing OBV z (flat flow) cannot signal a cliff
        if let Some(obv_z) = value_at(&indicators.obv_z, i) {
            let cliff = match side {
                Side::Long => obv_z <= -self.config.obv_veto_threshold,
                Side::Short => obv_z >= self.config.obv_veto_threshold,
            };
            if cliff {
                return Err(ScanRejection::ObvCliff);
            }
        }

        Ok(())
    }
}
