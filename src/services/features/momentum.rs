//! Momentum oscillators: RSI, MACD, stochastic, rate of change, Williams %R.

use super::rolling::{diff, ema, pct_change, rolling_max, rolling_mean, rolling_min, safe_div, zip_with};
use super::{Column, Ohlcv};

const STOCH_PERIOD: usize = 14;
const STOCH_SMOOTHING: usize = 3;

/// RSI over simple rolling means of gains and losses.
///
/// Zero average loss leaves the value undefined.
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let delta = diff(close, 1);
    let gains: Vec<f64> = delta
        .iter()
        .map(|d| if d.is_nan() { f64::NAN } else { d.max(0.0) })
        .collect();
    let losses: Vec<f64> = delta
        .iter()
        .map(|d| if d.is_nan() { f64::NAN } else { (-d).max(0.0) })
        .collect();
    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    zip_with(&avg_gain, &avg_loss, |g, l| {
        let rs = safe_div(g, l);
        100.0 - 100.0 / (1.0 + rs)
    })
}

/// MACD line, signal and histogram from EMA 12/26/9.
pub fn macd(close: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast = ema(close, 12);
    let slow = ema(close, 26);
    let line = zip_with(&fast, &slow, |f, s| f - s);
    let signal = ema(&line, 9);
    let histogram = zip_with(&line, &signal, |m, s| m - s);
    (line, signal, histogram)
}

/// `rsi_14`, `rsi_7`, `macd`, `macd_signal`, `macd_histogram`, `stoch_k`,
/// `stoch_d`, `roc_10`, `roc_20`, `williams_r`.
pub fn momentum_indicators(data: &Ohlcv) -> Vec<Column> {
    let (macd_line, macd_signal, macd_histogram) = macd(&data.close);

    let lowest = rolling_min(&data.low, STOCH_PERIOD);
    let highest = rolling_max(&data.high, STOCH_PERIOD);
    let stoch_k: Vec<f64> = (0..data.len())
        .map(|i| 100.0 * safe_div(data.close[i] - lowest[i], highest[i] - lowest[i]))
        .collect();
    let stoch_d = rolling_mean(&stoch_k, STOCH_SMOOTHING);
    let williams_r: Vec<f64> = (0..data.len())
        .map(|i| -100.0 * safe_div(highest[i] - data.close[i], highest[i] - lowest[i]))
        .collect();

    let roc = |lag: usize| -> Vec<f64> {
        pct_change(&data.close, lag).iter().map(|r| r * 100.0).collect()
    };

    vec![
        Column::new("rsi_14", rsi(&data.close, 14)),
        Column::new("rsi_7", rsi(&data.close, 7)),
        Column::new("macd", macd_line),
        Column::new("macd_signal", macd_signal),
        Column::new("macd_histogram", macd_histogram),
        Column::new("stoch_k", stoch_k),
        Column::new("stoch_d", stoch_d),
        Column::new("roc_10", roc(10)),
        Column::new("roc_20", roc(20)),
        Column::new("williams_r", williams_r),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::features::tests::zigzag_candles;

    #[test]
    fn test_rsi_in_range() {
        let data = Ohlcv::from_candles(&zigzag_candles(100));
        let values = rsi(&data.close, 14);
        assert!(values[13].is_nan());
        for v in values.iter().skip(14) {
            assert!(*v > 0.0 && *v < 100.0, "rsi out of range: {}", v);
        }
    }

    #[test]
    fn test_rsi_undefined_without_losses() {
        let close: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let values = rsi(&close, 14);
        assert!(values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_stochastic_undefined_on_flat_range() {
        let candles: Vec<_> = (0..30)
            .map(|i| crate::types::Candle::new(i, 5.0, 5.0, 5.0, 5.0, 1.0))
            .collect();
        let cols = momentum_indicators(&Ohlcv::from_candles(&candles));
        let k = cols.iter().find(|c| c.name == "stoch_k").unwrap();
        let w = cols.iter().find(|c| c.name == "williams_r").unwrap();
        assert!(k.values.iter().all(|v| v.is_nan()));
        assert!(w.values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_macd_histogram_is_difference() {
        let data = Ohlcv::from_candles(&zigzag_candles(100));
        let (line, signal, hist) = macd(&data.close);
        assert!((hist[80] - (line[80] - signal[80])).abs() < 1e-12);
        // slow EMA warm-up plus signal warm-up
        assert!(signal[32].is_nan());
        assert!(signal[33].is_finite());
    }

    #[test]
    fn test_stochastic_bounds() {
        let cols = momentum_indicators(&Ohlcv::from_candles(&zigzag_candles(100)));
        let k = cols.iter().find(|c| c.name == "stoch_k").unwrap();
        for v in k.values.iter().filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(v));
        }
    }
}
