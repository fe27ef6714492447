//! Column primitives shared by the feature stages.
//!
//! Every helper returns a new column of the same length as its input, with
//! `NaN` where the value is undefined. Output at row `i` only ever reads rows
//! `0..=i`.

/// Apply `f` over each trailing window of `window` rows.
///
/// Rows without a full window, or whose window holds a non-finite value,
/// are `NaN`.
pub fn rolling<F>(values: &[f64], window: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    for end in window..=values.len() {
        let slice = &values[end - window..end];
        if slice.iter().all(|v| v.is_finite()) {
            out[end - 1] = f(slice);
        }
    }
    out
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, mean)
}

pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, sample_std)
}

pub fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
}

pub fn rolling_min(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().cloned().fold(f64::INFINITY, f64::min))
}

/// Exponential moving average with smoothing factor `2 / (period + 1)`.
///
/// Seeded from the first finite value. Non-finite inputs are skipped without
/// resetting the state. Output is `NaN` until `period` finite values have
/// been consumed.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = vec![f64::NAN; values.len()];
    let mut state: Option<f64> = None;
    let mut seen = 0usize;

    for (i, &v) in values.iter().enumerate() {
        if v.is_finite() {
            state = Some(match state {
                Some(prev) => alpha * v + (1.0 - alpha) * prev,
                None => v,
            });
            seen += 1;
        }
        if seen >= period {
            if let Some(s) = state {
                out[i] = s;
            }
        }
    }
    out
}

/// `values[i] - values[i - lag]`.
pub fn diff(values: &[f64], lag: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i >= lag { values[i] - values[i - lag] } else { f64::NAN })
        .collect()
}

/// `values[i] / values[i - lag] - 1`.
pub fn pct_change(values: &[f64], lag: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i >= lag {
                safe_div(values[i] - values[i - lag], values[i - lag])
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Division that yields `NaN` on a zero or non-finite denominator.
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 || !den.is_finite() || !num.is_finite() {
        f64::NAN
    } else {
        num / den
    }
}

/// Element-wise combination of two equal-length columns.
pub fn zip_with<F>(a: &[f64], b: &[f64], f: F) -> Vec<f64>
where
    F: Fn(f64, f64) -> f64,
{
    a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect()
}
