//! Per-column affine normalisation with JSON persistence.
//!
//! All three methods reduce to `(x - center) / scale` with per-column
//! parameters, so transform and inverse share one code path.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::error::{ForecastError, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingMethod {
    /// Mean and population standard deviation.
    Standard,
    /// Min and range, mapping the fit data into [0, 1].
    MinMax,
    /// Median and interquartile range.
    Robust,
}

impl Default for ScalingMethod {
    fn default() -> Self {
        ScalingMethod::Standard
    }
}

impl ScalingMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Some(ScalingMethod::Standard),
            "minmax" => Some(ScalingMethod::MinMax),
            "robust" => Some(ScalingMethod::Robust),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ScalerError {
    #[error("scaler is not fitted")]
    NotFitted,

    #[error("expected {expected} columns, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("cannot fit on {0}")]
    InvalidInput(String),

    #[error("invalid scaler state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ScalerError {
    /// Attach the symbol and stage the scaler was used in.
    pub fn at(self, symbol: &str, stage: Stage) -> ForecastError {
        let message = self.to_string();
        match self {
            ScalerError::NotFitted => ForecastError::NotFitted {
                symbol: symbol.to_string(),
                stage,
            },
            ScalerError::ShapeMismatch { .. } => ForecastError::shape(symbol, stage, message),
            ScalerError::InvalidInput(_) => ForecastError::insufficient(symbol, stage, message),
            ScalerError::InvalidState(_) => ForecastError::data(symbol, stage, message),
            ScalerError::Io(e) => ForecastError::Io(e),
            ScalerError::Json(e) => ForecastError::SerdeJson(e),
        }
    }
}

/// Serialisable scaler parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub method: ScalingMethod,
    pub fitted: bool,
    pub center: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Scaler {
    state: ScalerState,
}

impl Scaler {
    pub fn new(method: ScalingMethod) -> Self {
        Self {
            state: ScalerState {
                method,
                fitted: false,
                center: Vec::new(),
                scale: Vec::new(),
            },
        }
    }

    pub fn method(&self) -> ScalingMethod {
        self.state.method
    }

    pub fn is_fitted(&self) -> bool {
        self.state.fitted
    }

    pub fn n_features(&self) -> Option<usize> {
        self.state.fitted.then(|| self.state.center.len())
    }

    pub fn state(&self) -> &ScalerState {
        &self.state
    }

    /// Compute per-column parameters from `data`, replacing any previous fit.
    pub fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<(), ScalerError> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(ScalerError::InvalidInput(format!(
                "a {}x{} matrix",
                data.nrows(),
                data.ncols()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ScalerError::InvalidInput("non-finite values".to_string()));
        }

        let mut center = Vec::with_capacity(data.ncols());
        let mut scale = Vec::with_capacity(data.ncols());
        for column in data.axis_iter(Axis(1)) {
            let values: Vec<f64> = column.iter().copied().collect();
            let (c, s) = match self.state.method {
                ScalingMethod::Standard => {
                    let mean = values.iter().sum::<f64>() / values.len() as f64;
                    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                        / values.len() as f64;
                    (mean, var.sqrt())
                }
                ScalingMethod::MinMax => {
                    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
                    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    (min, max - min)
                }
                ScalingMethod::Robust => {
                    let mut sorted = values;
                    sorted.sort_by(|a, b| a.total_cmp(b));
                    let median = quantile(&sorted, 0.5);
                    (median, quantile(&sorted, 0.75) - quantile(&sorted, 0.25))
                }
            };
            center.push(c);
            // constant columns pass through centred but unscaled
            scale.push(if s == 0.0 { 1.0 } else { s });
        }

        self.state.center = center;
        self.state.scale = scale;
        self.state.fitted = true;
        Ok(())
    }

    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, ScalerError> {
        self.check(data.ncols())?;
        let mut out = data.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (c, s) = (self.state.center[j], self.state.scale[j]);
            column.mapv_inplace(|v| (v - c) / s);
        }
        Ok(out)
    }

    pub fn inverse_transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, ScalerError> {
        self.check(data.ncols())?;
        let mut out = data.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (c, s) = (self.state.center[j], self.state.scale[j]);
            column.mapv_inplace(|v| v * s + c);
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>, ScalerError> {
        self.fit(data)?;
        self.transform(data)
    }

    /// Scale a single value of a one-column scaler.
    pub fn transform_value(&self, value: f64) -> Result<f64, ScalerError> {
        self.check(1)?;
        Ok((value - self.state.center[0]) / self.state.scale[0])
    }

    /// Inverse of [`Scaler::transform_value`].
    pub fn inverse_value(&self, value: f64) -> Result<f64, ScalerError> {
        self.check(1)?;
        Ok(value * self.state.scale[0] + self.state.center[0])
    }

    pub fn from_state(state: ScalerState) -> Result<Self, ScalerError> {
        if state.fitted {
            if state.center.len() != state.scale.len() || state.center.is_empty() {
                return Err(ScalerError::InvalidState(format!(
                    "{} centers and {} scales",
                    state.center.len(),
                    state.scale.len()
                )));
            }
            if state.scale.iter().any(|s| *s == 0.0 || !s.is_finite())
                || state.center.iter().any(|c| !c.is_finite())
            {
                return Err(ScalerError::InvalidState(
                    "non-finite or zero parameters".to_string(),
                ));
            }
        }
        Ok(Self { state })
    }

    /// Write the fitted parameters as JSON.
    pub fn save(&self, path: &Path) -> Result<(), ScalerError> {
        if !self.state.fitted {
            return Err(ScalerError::NotFitted);
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ScalerError> {
        let raw = fs::read_to_string(path)?;
        let state: ScalerState = serde_json::from_str(&raw)?;
        if !state.fitted {
            return Err(ScalerError::InvalidState("saved scaler is not fitted".to_string()));
        }
        Self::from_state(state)
    }

    fn check(&self, ncols: usize) -> Result<(), ScalerError> {
        if !self.state.fitted {
            return Err(ScalerError::NotFitted);
        }
        if ncols != self.state.center.len() {
            return Err(ScalerError::ShapeMismatch {
                expected: self.state.center.len(),
                actual: ncols,
            });
        }
        Ok(())
    }
}

/// Linear-interpolated quantile of sorted data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}
