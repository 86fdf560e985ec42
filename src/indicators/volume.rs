use crate::models::Candle;

/// On-Balance Volume
///
/// Running sum that adds the bar's volume on an up close, subtracts it on a
/// down close and carries over on an unchanged close. The first bar is 0.
pub fn obv_series(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    let mut obv = 0.0;
    for (i, candle) in candles.iter().enumerate() {
        if i > 0 {
            let prev_close = candles[i - 1].close;
            if candle.close > prev_close {
                obv += candle.volume;
            } else if candle.close < prev_close {
                obv -= candle.volume;
            }
        }
        out.push(obv);
    }
    out
}

/// Cumulative volume delta estimated with the tick rule
///
/// Bars without order-flow attribution are classified by close-to-close
/// direction, so this coincides with OBV on the same bars.
pub fn tick_rule_cvd(candles: &[Candle]) -> Vec<f64> {
    obv_series(candles)
}

pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume).collect()
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn test_obv_direction() {
        let candles = vec![
            candle(100.0, 10.0),
            candle(101.0, 20.0),
            candle(100.5, 5.0),
            candle(100.5, 50.0),
        ];
        assert_eq!(obv_series(&candles), vec![0.0, 20.0, 15.0, 15.0]);
    }

    #[test]
    fn test_obv_empty() {
        assert!(obv_series(&[]).is_empty());
    }
}
