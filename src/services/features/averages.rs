//! Simple and exponential moving averages of the close.

use super::rolling::{ema, rolling_mean, safe_div, zip_with};
use super::{Column, Ohlcv};

pub const MA_PERIODS: [usize; 5] = [7, 20, 50, 100, 200];

/// `sma_<n>`, `ema_<n>` for each period, then `price_sma20_ratio` and
/// `price_sma50_ratio`.
pub fn moving_averages(data: &Ohlcv) -> Vec<Column> {
    let mut columns = Vec::with_capacity(MA_PERIODS.len() * 2 + 2);

    for period in MA_PERIODS {
        columns.push(Column::new(
            format!("sma_{}", period),
            rolling_mean(&data.close, period),
        ));
    }
    for period in MA_PERIODS {
        columns.push(Column::new(
            format!("ema_{}", period),
            ema(&data.close, period),
        ));
    }

    let sma_20 = rolling_mean(&data.close, 20);
    let sma_50 = rolling_mean(&data.close, 50);
    columns.push(Column::new(
        "price_sma20_ratio",
        zip_with(&data.close, &sma_20, safe_div),
    ));
    columns.push(Column::new(
        "price_sma50_ratio",
        zip_with(&data.close, &sma_50, safe_div),
    ));
    columns
}
