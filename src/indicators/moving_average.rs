/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Exponential Moving Average for every bar
///
/// Recursive form with alpha = 2 / (span + 1), seeded with the first price
/// (no bias adjustment). Every entry is defined once the input is non-empty;
/// callers decide how many bars they need before trusting the value.
pub fn ema_series(prices: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    let mut ema = match prices.first() {
        Some(&first) => first,
        None => return out,
    };
    for &price in prices {
        ema = alpha * price + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// Calculate the current EMA, requiring at least `span` prices
pub fn calculate_ema(prices: &[f64], span: usize) -> Option<f64> {
    if span == 0 || prices.len() < span {
        return None;
    }
    ema_series(prices, span).last().copied()
}
