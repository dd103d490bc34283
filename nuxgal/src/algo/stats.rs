//! Sample statistics and significance conversions

use ndarray::{Array1, ArrayView2, Axis};
use scilib::math::basic::erf;
use std::f64::consts::SQRT_2;

/// Cumulative distribution function for standard normal distribution
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

/// Survival function of a chi-squared distribution with one degree of freedom.
///
/// This is the asymptotic p-value of a likelihood-ratio test statistic for a
/// single parameter; `sqrt(ts)` is the corresponding one-sided Gaussian significance.
pub fn chi2_one_dof_survival(ts: f64) -> f64 {
    if ts <= 0.0 {
        return 1.0;
    }
    2.0 * (1.0 - normal_cdf(ts.sqrt()))
}

/// Mean and unbiased standard deviation along the first axis.
///
/// Rows are samples. With a single sample the standard deviation is zero
/// rather than undefined.
///
/// # Returns
/// `(mean, std)` with one entry per column, or `None` for zero rows.
pub fn mean_and_std(samples: ArrayView2<f64>) -> Option<(Array1<f64>, Array1<f64>)> {
    let n = samples.nrows();
    if n == 0 {
        return None;
    }
    let mean = samples.mean_axis(Axis(0))?;
    if n == 1 {
        let std = Array1::zeros(mean.len());
        return Some((mean, std));
    }
    let std = samples.std_axis(Axis(0), 1.0);
    Some((mean, std))
}

/// Percentile of a sample with linear interpolation between order statistics.
///
/// NaN values are ignored. `q` is in percent, clamped to [0, 100].
///
/// # Returns
/// * `Ok(value)` - The interpolated percentile
/// * `Err(message)` - If no valid values remain after filtering NaN
pub fn percentile(values: &[f64], q: f64) -> Result<f64, String> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.is_empty() {
        return Err(format!(
            "Insufficient data points to compute percentile: {} total values, 0 valid (all NaN)",
            values.len()
        ));
    }
    valid.sort_by(|a, b| a.total_cmp(b));

    let rank = q.clamp(0.0, 100.0) / 100.0 * (valid.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Ok(valid[lower] * (1.0 - weight) + valid[upper] * weight)
}
