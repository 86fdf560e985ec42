use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators::{value_at, IndicatorSet};
use crate::models::{Candidate, Candle, MicroSnapshot, Side};
use crate::veto::microstructure::{micro_ok, MicroGateConfig, MicroVeto};

/// Configuration for breakout confirmation after a swing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub confirm_window: usize,    // Bars after the extremum to search
    pub breakout_atr_mult: f64,   // Close beyond the opposite extreme by this × ATR5
    pub confirmation_bars: usize, // Consecutive closes beyond the level, ending on the volume bar
    pub vol_mult: f64,            // Volume vs 50-bar rolling median
    pub enable_micro_gate: bool,
    pub gate: MicroGateConfig,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            confirm_window: 6,
            breakout_atr_mult: 0.5,
            confirmation_bars: 1,
            vol_mult: 1.5,
            enable_micro_gate: true,
            gate: MicroGateConfig::default(),
        }
    }
}

/// Result of a confirmation pass over the window after a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationOutcome {
    pub confirm_index: Option<usize>,
    pub breakout_bars: usize, // Bars that passed breakout + volume
    pub micro_bonus: f64,
    pub micro_vetoes: Vec<MicroVeto>,
}

impl ConfirmationOutcome {
    pub fn confirmed(&self) -> bool {
        self.confirm_index.is_some()
    }
}

/// Search `(i, i + confirm_window]` for a breakout bar with volume
///
/// A bar that breaks out but fails the microstructure gate does not end the
/// search; later bars in the window are still considered. Bars past the end
/// of the window are never read.
pub fn micro_confirm(
    candles: &[Candle],
    indicators: &IndicatorSet,
    candidate: &Candidate,
    config: &ConfirmationConfig,
    snapshot: Option<&MicroSnapshot>,
    now: DateTime<Utc>,
) -> ConfirmationOutcome {
    let mut outcome = ConfirmationOutcome {
        confirm_index: None,
        breakout_bars: 0,
        micro_bonus: 0.0,
        micro_vetoes: Vec::new(),
    };

    let i = candidate.bar_index;
    if i >= candles.len() {
        return outcome;
    }
    let Some(atr5) = value_at(&indicators.atr5, i) else {
        return outcome;
    };

    let base = match candidate.side {
        Side::Long => candles[i].high,
        Side::Short => candles[i].low,
    };
    let offset = config.breakout_atr_mult * atr5;
    let beyond = |k: usize| match candidate.side {
        Side::Long => candles[k].close > base + offset,
        Side::Short => candles[k].close < base - offset,
    };
    let held = config.confirmation_bars.max(1);
    let last = (i + config.confirm_window).min(candles.len() - 1);

    for j in (i + 1)..=last {
        let breakout = j >= i + held && (j + 1 - held..=j).all(beyond);
        let volume_ok = value_at(&indicators.volume_median, j)
            .is_some_and(|median| candles[j].volume >= config.vol_mult * median);

        if !(breakout && volume_ok) {
            continue;
        }
        outcome.breakout_bars += 1;

        if !config.enable_micro_gate {
            outcome.confirm_index = Some(j);
            break;
        }

        let gate = micro_ok(candidate.side, snapshot, &config.gate, now);
        if gate.ok {
            outcome.confirm_index = Some(j);
            outcome.micro_bonus = gate.bonus;
            break;
        }
        tracing::debug!(bar = j, vetoes = ?gate.vetoes, "breakout vetoed by microstructure, scanning on");
        outcome.micro_vetoes.extend(gate.vetoes);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_candles(n: usize) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(5 * n as i64);
        (0..n)
            .map(|k| Candle {
                timestamp: start + Duration::minutes(5 * k as i64),
                open: 100.0,
                high: 100.5,
                low: 99.5,
                close: 100.0,
                volume: 1000.0,
            })
            .collect()
    }

    fn candidate(bar_index: usize, side: Side) -> Candidate {
        Candidate {
            side,
            extremum_price: 99.5,
            bar_index,
            bar_timestamp: Utc::now(),
            created_at: Utc::now(),
            timeout_minutes: 30,
        }
    }

    fn snapshot(imbalance: f64) -> MicroSnapshot {
        MicroSnapshot {
            timestamp: Utc::now(),
            best_bid: 100.0,
            best_ask: 100.02,
            spread_bps: 2.0,
            bid_depth: 150_000.0,
            ask_depth: 100_000.0,
            ladder_imbalance: imbalance,
            cvd: 0.0,
            cvd_slope: 0.0,
            trade_volume: 0.0,
            ok: true,
        }
    }

    fn breakout(candles: &mut [Candle], j: usize, close: f64) {
        candles[j].close = close;
        candles[j].high = close + 0.1;
        candles[j].volume = 3000.0;
    }

    #[test]
    fn test_confirms_on_breakout_bar() {
        let mut candles = create_test_candles(70);
        breakout(&mut candles, 63, 101.5);
        let indicators = IndicatorSet::compute(&candles);
        let snap = snapshot(0.3);

        let outcome = micro_confirm(
            &candles,
            &indicators,
            &candidate(60, Side::Long),
            &ConfirmationConfig::default(),
            Some(&snap),
            Utc::now(),
        );
        assert_eq!(outcome.confirm_index, Some(63));
        assert!(outcome.micro_bonus > 0.0);
    }

    #[test]
    fn test_confirm_index_within_window() {
        let mut candles = create_test_candles(80);
        // Breakout beyond the 6-bar window must be ignored
        breakout(&mut candles, 67, 102.0);
        let indicators = IndicatorSet::compute(&candles);
        let snap = snapshot(0.3);

        let outcome = micro_confirm(
            &candles,
            &indicators,
            &candidate(60, Side::Long),
            &ConfirmationConfig::default(),
            Some(&snap),
            Utc::now(),
        );
        assert_eq!(outcome.confirm_index, None);
    }

    #[test]
    fn test_breakout_without_volume_fails() {
        let mut candles = create_test_candles(70);
        candles[62].close = 102.0;
        let indicators = IndicatorSet::compute(&candles);
        let snap = snapshot(0.3);

        let outcome = micro_confirm(
            &candles,
            &indicators,
            &candidate(60, Side::Long),
            &ConfirmationConfig::default(),
            Some(&snap),
            Utc::now(),
        );
        assert!(!outcome.confirmed());
        assert_eq!(outcome.breakout_bars, 0);
    }

    #[test]
    fn test_micro_veto_keeps_scanning() {
        let mut candles = create_test_candles(70);
        breakout(&mut candles, 62, 101.5);
        breakout(&mut candles, 64, 101.8);
        let indicators = IndicatorSet::compute(&candles);
        // Imbalance against the long: every breakout bar is vetoed
        let snap = snapshot(-0.3);

        let outcome = micro_confirm(
            &candles,
            &indicators,
            &candidate(60, Side::Long),
            &ConfirmationConfig::default(),
            Some(&snap),
            Utc::now(),
        );
        assert!(!outcome.confirmed());
        assert_eq!(outcome.breakout_bars, 2);
        assert_eq!(outcome.micro_vetoes.len(), 2);
    }

    #[test]
    fn test_missing_snapshot_fails_closed() {
        let mut candles = create_test_candles(70);
        breakout(&mut candles, 63, 101.5);
        let indicators = IndicatorSet::compute(&candles);

        let outcome = micro_confirm(
            &candles,
            &indicators,
            &candidate(60, Side::Long),
            &ConfirmationConfig::default(),
            None,
            Utc::now(),
        );
        assert!(!outcome.confirmed());
        assert_eq!(outcome.micro_vetoes, vec![MicroVeto::NoSnapshot]);
    }

    #[test]
    fn test_short_breakdown() {
        let mut candles = create_test_candles(70);
        candles[61].close = 98.5;
        candles[61].low = 98.4;
        candles[61].volume = 3000.0;
        let indicators = IndicatorSet::compute(&candles);
        let snap = snapshot(-0.3);

        let outcome = micro_confirm(
            &candles,
            &indicators,
            &candidate(60, Side::Short),
            &ConfirmationConfig::default(),
            Some(&snap),
            Utc::now(),
        );
        assert_eq!(outcome.confirm_index, Some(61));
    }

    #[test]
    fn test_lower_multiplier_confirms_smaller_breakout() {
        let mut candles = create_test_candles(70);
        // 0.4 × ATR5 past the swing high
        breakout(&mut candles, 63, 100.9);
        let indicators = IndicatorSet::compute(&candles);
        let snap = snapshot(0.3);
        let run = |config: &ConfirmationConfig| {
            micro_confirm(&candles, &indicators, &candidate(60, Side::Long), config, Some(&snap), Utc::now())
        };

        assert!(!run(&ConfirmationConfig::default()).confirmed());
        let wide = ConfirmationConfig {
            breakout_atr_mult: 0.35,
            ..ConfirmationConfig::default()
        };
        assert_eq!(run(&wide).confirm_index, Some(63));
    }

    #[test]
    fn test_two_bar_confirmation_needs_prior_close() {
        let mut candles = create_test_candles(70);
        breakout(&mut candles, 63, 101.5);
        let two_bars = ConfirmationConfig {
            confirmation_bars: 2,
            ..ConfirmationConfig::default()
        };
        let snap = snapshot(0.3);

        let indicators = IndicatorSet::compute(&candles);
        let outcome = micro_confirm(&candles, &indicators, &candidate(60, Side::Long), &two_bars, Some(&snap), Utc::now());
        assert!(!outcome.confirmed());

        // Quiet close above the level on the bar before
        candles[62].close = 101.2;
        candles[62].high = 101.3;
        let indicators = IndicatorSet::compute(&candles);
        let outcome = micro_confirm(&candles, &indicators, &candidate(60, Side::Long), &two_bars, Some(&snap), Utc::now());
        assert_eq!(outcome.confirm_index, Some(63));
    }

    #[test]
    fn test_window_clipped_at_series_end() {
        let mut candles = create_test_candles(63);
        breakout(&mut candles, 62, 101.5);
        let indicators = IndicatorSet::compute(&candles);
        let snap = snapshot(0.3);

        let outcome = micro_confirm(
            &candles,
            &indicators,
            &candidate(60, Side::Long),
            &ConfirmationConfig::default(),
            Some(&snap),
            Utc::now(),
        );
        assert_eq!(outcome.confirm_index, Some(62));
    }
}
