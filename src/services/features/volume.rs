//! Volume-based columns.

use super::rolling::{diff, ema, rolling_mean, safe_div, zip_with};
use super::{Column, Ohlcv};

/// On-balance volume, starting at zero and unchanged on flat closes.
pub fn obv(data: &Ohlcv) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    let mut total = 0.0;
    for i in 0..data.len() {
        if i > 0 {
            if data.close[i] > data.close[i - 1] {
                total += data.volume[i];
            } else if data.close[i] < data.close[i - 1] {
                total -= data.volume[i];
            }
        }
        out.push(total);
    }
    out
}

/// `obv`, `volume_sma_20`, `volume_ratio`, `force_index`, `force_index_13`.
pub fn volume_indicators(data: &Ohlcv) -> Vec<Column> {
    let volume_sma = rolling_mean(&data.volume, 20);
    let volume_ratio = zip_with(&data.volume, &volume_sma, safe_div);
    let force_index = zip_with(&diff(&data.close, 1), &data.volume, |d, v| d * v);
    let force_index_13 = ema(&force_index, 13);

    vec![
        Column::new("obv", obv(data)),
        Column::new("volume_sma_20", volume_sma),
        Column::new("volume_ratio", volume_ratio),
        Column::new("force_index", force_index),
        Column::new("force_index_13", force_index_13),
    ]
}
