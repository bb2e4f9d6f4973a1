//! Small order statistics over `f64` samples.
//!
//! All functions ignore NaN ordering issues by using `total_cmp`, and return
//! `None` for empty input rather than dividing by zero.

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of the values. Sorts the slice in place.
pub fn median_f64(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let mid = values.len() / 2;

    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Linearly interpolated percentile, `percentile` in `0.0..=1.0`.
/// Sorts the slice in place.
pub fn percentile_f64(values: &mut [f64], percentile: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let percentile = percentile.clamp(0.0, 1.0);
    let pos = (values.len() - 1) as f64 * percentile;
    let base = pos.floor();
    let rest = pos - base;
    let base = base as usize;

    if base + 1 < values.len() {
        return Some(values[base] + rest * (values[base + 1] - values[base]));
    }

    Some(values[base])
}

/// Sort the values and drop the lowest and highest `floor(n * fraction)`
/// entries.
///
/// With the default quartile fraction of 0.25 the result has
/// `n - 2 * floor(n / 4)` elements. Sets smaller than four are returned
/// sorted but untrimmed.
pub fn trim_sorted(values: &[f64], fraction: f64) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let k = (sorted.len() as f64 * fraction.clamp(0.0, 0.5)).floor() as usize;
    if 2 * k >= sorted.len() {
        return sorted;
    }

    sorted[k..sorted.len() - k].to_vec()
}
