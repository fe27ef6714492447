//! Bollinger bands and average true range.

use super::rolling::{rolling_mean, rolling_std, safe_div};
use super::{Column, Ohlcv};

const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_WIDTH: f64 = 2.0;
const ATR_PERIOD: usize = 14;

/// True range. The first row has no previous close and uses high - low.
pub fn true_range(data: &Ohlcv) -> Vec<f64> {
    (0..data.len())
        .map(|i| {
            let hl = data.high[i] - data.low[i];
            if i == 0 {
                return hl;
            }
            let prev = data.close[i - 1];
            hl.max((data.high[i] - prev).abs())
                .max((data.low[i] - prev).abs())
        })
        .collect()
}

/// Rolling mean of the true range.
pub fn atr(data: &Ohlcv, period: usize) -> Vec<f64> {
    rolling_mean(&true_range(data), period)
}

/// Bollinger bands (20, 2 sample std) and `atr_14`.
///
/// A zero-width band leaves `bb_width_20` and `bb_position_20` undefined.
pub fn volatility_indicators(data: &Ohlcv) -> Vec<Column> {
    let middle = rolling_mean(&data.close, BOLLINGER_PERIOD);
    let std = rolling_std(&data.close, BOLLINGER_PERIOD);

    let upper: Vec<f64> = middle
        .iter()
        .zip(&std)
        .map(|(m, s)| m + BOLLINGER_WIDTH * s)
        .collect();
    let lower: Vec<f64> = middle
        .iter()
        .zip(&std)
        .map(|(m, s)| m - BOLLINGER_WIDTH * s)
        .collect();
    let width: Vec<f64> = (0..data.len())
        .map(|i| {
            if upper[i] == lower[i] {
                f64::NAN
            } else {
                safe_div(upper[i] - lower[i], middle[i])
            }
        })
        .collect();
    let position: Vec<f64> = (0..data.len())
        .map(|i| safe_div(data.close[i] - lower[i], upper[i] - lower[i]))
        .collect();

    vec![
        Column::new("bb_upper_20", upper),
        Column::new("bb_middle_20", middle),
        Column::new("bb_lower_20", lower),
        Column::new("bb_width_20", width),
        Column::new("bb_position_20", position),
        Column::new("atr_14", atr(data, ATR_PERIOD)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::features::tests::zigzag_candles;
    use crate::types::Candle;

    #[test]
    fn test_true_range_uses_previous_close() {
        let candles = vec![
            Candle::new(0, 10.0, 11.0, 9.0, 10.0, 1.0),
            Candle::new(1, 14.0, 15.0, 13.0, 14.0, 1.0),
        ];
        let tr = true_range(&Ohlcv::from_candles(&candles));
        assert_eq!(tr[0], 2.0);
        // gap up: |15 - 10| beats 15 - 13
        assert_eq!(tr[1], 5.0);
    }

    #[test]
    fn test_bands_ordered() {
        let cols = volatility_indicators(&Ohlcv::from_candles(&zigzag_candles(80)));
        let upper = &cols[0].values;
        let middle = &cols[1].values;
        let lower = &cols[2].values;
        assert!(upper[18].is_nan());
        for i in 19..80 {
            assert!(upper[i] > middle[i] && middle[i] > lower[i]);
        }
    }

    #[test]
    fn test_flat_series_has_undefined_width() {
        let candles: Vec<_> = (0..30).map(|i| Candle::new(i, 5.0, 6.0, 4.0, 5.0, 1.0)).collect();
        let cols = volatility_indicators(&Ohlcv::from_candles(&candles));
        assert!(cols[3].values[25].is_nan());
        assert!(cols[4].values[25].is_nan());
        assert_eq!(cols[5].values[25], 2.0);
    }
}
