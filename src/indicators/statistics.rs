//! Rolling-window statistics shared by the indicator set
//!
//! All helpers return vectors aligned with their input. A window is only
//! evaluated once it is complete and every value inside it is present.

/// Rolling mean over complete windows
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_apply(values, window, |w| Some(mean(w)))
}

/// Rolling sample standard deviation (n - 1 denominator)
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_apply(values, window, sample_std)
}

/// Z-score of each value against its trailing window (current bar included)
///
/// None when the window is incomplete or has zero spread.
pub fn rolling_zscore(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_apply(values, window, |w| {
        let std = sample_std(w)?;
        if std <= f64::EPSILON {
            return None;
        }
        let last = *w.last()?;
        Some((last - mean(w)) / std)
    })
}

/// Z-score of the final value against the trailing window
pub fn last_zscore(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    rolling_zscore(&values[values.len() - window..], window)
        .last()
        .copied()
        .flatten()
}

/// Rolling median over complete windows
pub fn rolling_median(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_apply(values, window, median)
}

/// Percentile rank (0-100) of each value within its trailing window
///
/// Ties share their average rank. Windows containing a missing value are None.
pub fn percentile_rank_series(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for end in window..=values.len() {
        let slice = &values[end - window..end];
        let present: Option<Vec<f64>> = slice.iter().copied().collect();
        let Some(present) = present else {
            continue;
        };
        let current = present[window - 1];
        let below = present.iter().filter(|v| **v < current).count() as f64;
        let equal = present.iter().filter(|v| **v == current).count() as f64;
        let rank = below + (equal + 1.0) / 2.0;
        out[end - 1] = Some(rank / window as f64 * 100.0);
    }
    out
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn rolling_apply<F>(values: &[f64], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for end in window..=values.len() {
        out[end - 1] = f(&values[end - window..end]);
    }
    out
}
