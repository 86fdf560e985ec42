/// Bollinger Band width
///
/// Bands are SMA(period) ± k·σ with sample standard deviation. Width is
/// normalised by the upper band: (upper - lower) / upper.

use super::statistics::{rolling_mean, rolling_std};

pub fn bb_width_series(closes: &[f64], period: usize, k: f64) -> Vec<Option<f64>> {
    let means = rolling_mean(closes, period);
    let stds = rolling_std(closes, period);

    means
        .iter()
        .zip(stds.iter())
        .map(|(mean, std)| {
            let (mean, std) = ((*mean)?, (*std)?);
            let upper = mean + k * std;
            let lower = mean - k * std;
            if upper.abs() <= f64::EPSILON {
                return None;
            }
            Some((upper - lower) / upper)
        })
        .collect()
}
