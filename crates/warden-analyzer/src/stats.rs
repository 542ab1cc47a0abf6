//! Small statistics kernel over sample windows.

use serde::Serialize;

/// Per-metric statistics over the analysis window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricStatistics {
    /// Newest sample value.
    pub current_value: f64,
    /// Arithmetic mean over the window.
    pub moving_average: f64,
    /// Value at the configured percentile, linear-interpolated.
    pub percentile: f64,
    /// Maximum value in the window.
    pub peak: f64,
    /// Slope of a least-squares fit over index → value.
    pub trend: f64,
    pub sample_count: usize,
}

/// Compute statistics over an ordered window of values.
pub fn compute(values: &[f64], percentile: f64) -> MetricStatistics {
    if values.is_empty() {
        return MetricStatistics::default();
    }

    let current_value = *values.last().expect("non-empty");
    let sum: f64 = values.iter().sum();
    let moving_average = sum / values.len() as f64;
    let peak = values.iter().copied().fold(f64::MIN, f64::max);

    MetricStatistics {
        current_value,
        moving_average,
        percentile: percentile_of(values, percentile),
        peak,
        trend: slope(values),
        sample_count: values.len(),
    }
}

/// Value at `p` (0..=100) with linear interpolation on the sorted values.
pub fn percentile_of(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Least-squares slope over `(index, value)` pairs. Zero for fewer than two
/// points or a degenerate denominator.
pub fn slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y: f64 = values.iter().sum::<f64>() / n_f;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        numerator += dx * (y - mean_y);
        denominator += dx * dx;
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
