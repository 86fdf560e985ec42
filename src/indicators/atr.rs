/// Average True Range (ATR) indicator
///
/// Measures market volatility by averaging true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The first bar has no previous close, so its true range is High - Low.
/// Averaging is a simple rolling mean, matching the rest of the indicator set.

use crate::models::Candle;

/// True range per bar, aligned with `candles`
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let range = candle.high - candle.low;
            if i == 0 {
                return range;
            }
            let prev_close = candles[i - 1].close;
            range
                .max((candle.high - prev_close).abs())
                .max((candle.low - prev_close).abs())
        })
        .collect()
}

/// Rolling ATR aligned with `candles`
///
/// Entries before `period - 1` are None (warm-up).
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let trs = true_ranges(candles);
    let mut out = vec![None; trs.len()];
    if period == 0 || trs.len() < period {
        return out;
    }

    let mut window_sum: f64 = trs[..period].iter().sum();
    out[period - 1] = Some(window_sum / period as f64);
    for i in period..trs.len() {
        window_sum += trs[i] - trs[i - period];
        out[i] = Some(window_sum / period as f64);
    }
    out
}

/// Calculate the current ATR for the given candles
///
/// Returns None if insufficient data
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: Utc::now() + chrono::Duration::minutes(5 * i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let candles = create_test_candles(&[
            (100.0, 101.0, 99.0, 100.0),
            (104.0, 105.0, 103.0, 104.0), // gap up: |105 - 100| = 5
        ]);
        let trs = true_ranges(&candles);
        assert_eq!(trs, vec![2.0, 5.0]);
    }

    #[test]
    fn test_atr_constant_range() {
        let candles: Vec<_> = (0..20)
            .map(|_| (100.0, 101.0, 99.0, 100.0))
            .collect();
        let candles = create_test_candles(&candles);
        let atr = calculate_atr(&candles, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_warm_up_is_none() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 4]);
        let series = atr_series(&candles, 5);
        assert!(series.iter().all(|v| v.is_none()));
        assert_eq!(calculate_atr(&candles, 5), None);
    }

    #[test]
    fn test_atr_series_alignment() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 6]);
        let series = atr_series(&candles, 5);
        assert_eq!(series.len(), 6);
        assert!(series[3].is_none());
        assert!(series[4].is_some());
    }

    #[test]
    fn test_atr_responds_to_volatility() {
        let mut prices = vec![(100.0, 100.5, 99.5, 100.0); 10];
        prices.extend(vec![(100.0, 104.0, 96.0, 100.0); 5]);
        let candles = create_test_candles(&prices);
        let series = atr_series(&candles, 5);
        let calm = series[9].unwrap();
        let wild = series[14].unwrap();
        assert!(wild > calm * 4.0);
    }
}
