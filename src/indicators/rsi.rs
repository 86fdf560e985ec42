/// Calculate Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    rsi_series(prices, period).last().copied().flatten()
}

/// RSI for every bar, using simple rolling means of gains and losses
///
/// The first valid value sits at index `period`.
pub fn rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return out;
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);
    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut gain_sum: f64 = gains[..period].iter().sum();
    let mut loss_sum: f64 = losses[..period].iter().sum();
    out[period] = Some(rsi_from_sums(gain_sum, loss_sum));

    for i in period..gains.len() {
        gain_sum += gains[i] - gains[i - period];
        loss_sum += losses[i] - losses[i - period];
        out[i + 1] = Some(rsi_from_sums(gain_sum, loss_sum));
    }
    out
}

fn rsi_from_sums(gain_sum: f64, loss_sum: f64) -> f64 {
    // Rolling sums can drift slightly below zero
    let gain = gain_sum.max(0.0);
    let loss = loss_sum.max(0.0);
    if loss <= f64::EPSILON {
        return if gain <= f64::EPSILON { 50.0 } else { 100.0 };
    }
    let rs = gain / loss;
    100.0 - (100.0 / (1.0 + rs))
}
