//! Trend strength: ADX, CCI and Aroon.

use super::rolling::{ema, rolling, rolling_mean, safe_div};
use super::volatility::atr;
use super::{Column, Ohlcv};

const ADX_PERIOD: usize = 14;
const CCI_PERIOD: usize = 20;
const AROON_PERIOD: usize = 25;

/// Average directional index.
///
/// - +DM / -DM: upward high move / downward low move, floored at zero
/// - DI: 100 * EMA(DM) / ATR
/// - DX: 100 * |+DI - -DI| / (+DI + -DI), undefined when the sum is zero
/// - ADX: EMA(DX)
pub fn adx(data: &Ohlcv, period: usize) -> Vec<f64> {
    let n = data.len();
    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];
    for i in 1..n {
        plus_dm[i] = (data.high[i] - data.high[i - 1]).max(0.0);
        minus_dm[i] = (data.low[i - 1] - data.low[i]).max(0.0);
    }

    let atr = atr(data, period);
    let plus_smoothed = ema(&plus_dm, period);
    let minus_smoothed = ema(&minus_dm, period);

    let dx: Vec<f64> = (0..n)
        .map(|i| {
            let plus_di = 100.0 * safe_div(plus_smoothed[i], atr[i]);
            let minus_di = 100.0 * safe_div(minus_smoothed[i], atr[i]);
            100.0 * safe_div((plus_di - minus_di).abs(), plus_di + minus_di)
        })
        .collect();

    ema(&dx, period)
}

/// Commodity channel index on the typical price.
pub fn cci(data: &Ohlcv, period: usize) -> Vec<f64> {
    let typical: Vec<f64> = (0..data.len())
        .map(|i| (data.high[i] + data.low[i] + data.close[i]) / 3.0)
        .collect();
    let ma = rolling_mean(&typical, period);
    let mean_dev = rolling(&typical, period, |w| {
        let m = w.iter().sum::<f64>() / w.len() as f64;
        w.iter().map(|v| (v - m).abs()).sum::<f64>() / w.len() as f64
    });

    (0..data.len())
        .map(|i| safe_div(typical[i] - ma[i], 0.015 * mean_dev[i]))
        .collect()
}

/// Index within `window` of its extreme, preferring the most recent on ties.
fn extreme_index(window: &[f64], better: impl Fn(f64, f64) -> bool) -> usize {
    let mut best = 0;
    for (i, &v) in window.iter().enumerate() {
        if !better(window[best], v) {
            best = i;
        }
    }
    best
}

/// Aroon up and down over `period + 1` rows.
///
/// Up = 100 * (period - periods since the highest high) / period; down
/// likewise for the lowest low.
pub fn aroon(data: &Ohlcv, period: usize) -> (Vec<f64>, Vec<f64>) {
    let scale = |idx: usize| 100.0 * idx as f64 / period as f64;
    let up = rolling(&data.high, period + 1, |w| {
        scale(extreme_index(w, |best, v| best > v))
    });
    let down = rolling(&data.low, period + 1, |w| {
        scale(extreme_index(w, |best, v| best < v))
    });
    (up, down)
}

/// `adx_14`, `cci_20`, `aroon_up`, `aroon_down`, `aroon_oscillator`.
pub fn trend_indicators(data: &Ohlcv) -> Vec<Column> {
    let (up, down) = aroon(data, AROON_PERIOD);
    let oscillator: Vec<f64> = up.iter().zip(&down).map(|(u, d)| u - d).collect();

    vec![
        Column::new("adx_14", adx(data, ADX_PERIOD)),
        Column::new("cci_20", cci(data, CCI_PERIOD)),
        Column::new("aroon_up", up),
        Column::new("aroon_down", down),
        Column::new("aroon_oscillator", oscillator),
    ]
}
