//! Regression and direction metrics over held-out predictions.

use thiserror::Error;

use crate::error::{ForecastError, Stage};
use crate::types::Metrics;

#[derive(Error, Debug, PartialEq)]
pub enum EvaluationError {
    #[error("nothing to evaluate")]
    Empty,

    #[error("{predictions} predictions for {targets} targets")]
    LengthMismatch { predictions: usize, targets: usize },
}

impl EvaluationError {
    pub fn at(self, symbol: &str) -> ForecastError {
        let message = self.to_string();
        match self {
            EvaluationError::Empty => ForecastError::insufficient(symbol, Stage::Evaluation, message),
            EvaluationError::LengthMismatch { .. } => ForecastError::shape(symbol, Stage::Evaluation, message),
        }
    }
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

pub struct Evaluator;

impl Evaluator {
    /// MAE, RMSE, MAPE (%), R² and directional accuracy (%) of `predictions`
    /// against `targets`.
    ///
    /// - MAPE skips zero targets and is 0 when every target is zero
    /// - R² is 0 when the targets have no variance, unless the fit is exact
    /// - directional accuracy is the share of matching signs
    pub fn evaluate(predictions: &[f64], targets: &[f64]) -> Result<Metrics, EvaluationError> {
        Self::check(predictions.len(), targets.len())?;
        let (mae, rmse, mape, r2) = Self::errors(predictions, targets);
        let matches = predictions
            .iter()
            .zip(targets)
            .filter(|(p, t)| sign(**p) == sign(**t))
            .count();

        Ok(Metrics {
            mae,
            rmse,
            mape,
            r2,
            directional_accuracy: 100.0 * matches as f64 / targets.len() as f64,
        })
    }

    /// Price-space errors, with directional accuracy taken on the move from
    /// each `reference` price (the last observed close) to the predicted and
    /// actual prices.
    pub fn evaluate_forecasts(
        predicted: &[f64],
        actual: &[f64],
        reference: &[f64],
    ) -> Result<Metrics, EvaluationError> {
        Self::check(predicted.len(), actual.len())?;
        Self::check(reference.len(), actual.len())?;

        let predicted_moves: Vec<f64> = predicted.iter().zip(reference).map(|(p, r)| p - r).collect();
        let actual_moves: Vec<f64> = actual.iter().zip(reference).map(|(a, r)| a - r).collect();
        let direction = Self::evaluate(&predicted_moves, &actual_moves)?.directional_accuracy;

        let (mae, rmse, mape, r2) = Self::errors(predicted, actual);
        Ok(Metrics {
            mae,
            rmse,
            mape,
            r2,
            directional_accuracy: direction,
        })
    }

    fn check(predictions: usize, targets: usize) -> Result<(), EvaluationError> {
        if predictions != targets {
            return Err(EvaluationError::LengthMismatch { predictions, targets });
        }
        if targets == 0 {
            return Err(EvaluationError::Empty);
        }
        Ok(())
    }

    fn errors(predictions: &[f64], targets: &[f64]) -> (f64, f64, f64, f64) {
        let n = targets.len() as f64;
        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        let mut pct_sum = 0.0;
        let mut pct_count = 0usize;
        for (p, t) in predictions.iter().zip(targets) {
            let err = t - p;
            abs_sum += err.abs();
            sq_sum += err * err;
            if *t != 0.0 {
                pct_sum += (err / t).abs();
                pct_count += 1;
            }
        }

        let mean = targets.iter().sum::<f64>() / n;
        let ss_tot: f64 = targets.iter().map(|t| (t - mean).powi(2)).sum();
        let r2 = if ss_tot == 0.0 {
            if sq_sum == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - sq_sum / ss_tot
        };
        let mape = if pct_count == 0 {
            0.0
        } else {
            100.0 * pct_sum / pct_count as f64
        };

        (abs_sum / n, (sq_sum / n).sqrt(), mape, r2)
    }
}
