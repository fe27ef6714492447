//! Return, spread and realised-volatility columns.

use super::rolling::{pct_change, rolling_std, safe_div, zip_with};
use super::{Column, Ohlcv};

/// Windows for the rolling volatility of simple returns.
pub const VOLATILITY_WINDOWS: [usize; 3] = [10, 20, 50];

/// Price features.
///
/// - `returns`: close-to-close simple return
/// - `log_returns`: ln(close / previous close)
/// - `hl_spread`: (high - low) / close
/// - `oc_spread`: (close - open) / close
/// - `volatility_<n>`: sample std of `returns` over n rows
pub fn price_features(data: &Ohlcv) -> Vec<Column> {
    let returns = pct_change(&data.close, 1);
    let log_returns: Vec<f64> = (0..data.len())
        .map(|i| {
            if i == 0 {
                f64::NAN
            } else {
                safe_div(data.close[i], data.close[i - 1]).ln()
            }
        })
        .collect();
    let hl_spread = zip_with(
        &zip_with(&data.high, &data.low, |h, l| h - l),
        &data.close,
        safe_div,
    );
    let oc_spread = zip_with(
        &zip_with(&data.close, &data.open, |c, o| c - o),
        &data.close,
        safe_div,
    );

    let mut columns = vec![
        Column::new("returns", returns.clone()),
        Column::new("log_returns", log_returns),
        Column::new("hl_spread", hl_spread),
        Column::new("oc_spread", oc_spread),
    ];
    for window in VOLATILITY_WINDOWS {
        columns.push(Column::new(
            format!("volatility_{}", window),
            rolling_std(&returns, window),
        ));
    }
    columns
}
