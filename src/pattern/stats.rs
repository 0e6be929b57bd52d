//! Statistical helpers shared by the six pattern analyzers.
//! Grounded in `original_source/shared/pattern_recognition.cpp`'s
//! `calculate_mean`/`calculate_std_dev`/`calculate_correlation`/`calculate_zscore`.
//! Empty or singleton inputs yield 0 by convention.

/// Magnitude returned for any nonzero deviation from a zero-variance
/// baseline: such a deviation is maximally anomalous, not absent.
const ZERO_VARIANCE_DEVIATION_Z: f64 = 1.0e6;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn zscore(value: f64, baseline: &[f64]) -> f64 {
    let m = mean(baseline);
    let sd = stddev(baseline);
    if sd == 0.0 {
        return if value == m {
            0.0
        } else {
            (value - m).signum() * ZERO_VARIANCE_DEVIATION_Z
        };
    }
    (value - m) / sd
}

/// Pearson correlation coefficient over paired samples.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() || xs.len() < 2 {
        return 0.0;
    }
    let mx = mean(xs);
    let my = mean(ys);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Coefficient of variation (stddev / |mean|); used by the behavior
/// analyzer to detect stable behavior. 0 for a zero mean by convention.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    (stddev(values) / m).abs()
}

/// Ordinary least squares slope of `values` indexed 0..n against their
/// position, used by the trend analyzer, plus the fit's R^2.
pub fn linear_regression_slope_r2(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (0.0, 0.0);
    }

    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let mx = mean(&xs);
    let my = mean(values);

    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(values.iter()) {
        num += (x - mx) * (y - my);
        den += (x - mx).powi(2);
    }
    if den == 0.0 {
        return (0.0, 0.0);
    }
    let slope = num / den;
    let intercept = my - slope * mx;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (x, y) in xs.iter().zip(values.iter()) {
        let predicted = slope * x + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - my).powi(2);
    }
    let r2 = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

    (slope, r2)
}
