//! Trainable window-to-scalar predictors.
//!
//! The trainer only sees the [`Predictor`] trait: a flat parameter vector, a
//! batch loss with its gradient, and single-window inference. Concrete models
//! are chosen by [`PredictorKind`] and built through [`build_predictor`].

pub mod linear;
pub mod mlp;

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::{ForecastError, Stage};

pub use linear::LinearPredictor;
pub use mlp::MlpPredictor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorKind {
    /// Linear map over the flattened window.
    Linear,
    /// One tanh hidden layer.
    Mlp,
}

impl PredictorKind {
    pub const ALL: [PredictorKind; 2] = [PredictorKind::Linear, PredictorKind::Mlp];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Some(PredictorKind::Linear),
            "mlp" => Some(PredictorKind::Mlp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictorKind::Linear => "linear",
            PredictorKind::Mlp => "mlp",
        }
    }
}

impl Default for PredictorKind {
    fn default() -> Self {
        PredictorKind::Mlp
    }
}

impl fmt::Display for PredictorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum PredictorError {
    #[error("window shape {actual:?} does not match model input {expected:?}")]
    InputShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("expected {expected} parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    #[error("batch has {windows} windows and {targets} targets")]
    Batch { windows: usize, targets: usize },
}

impl PredictorError {
    pub fn at(self, symbol: &str, stage: Stage) -> ForecastError {
        ForecastError::shape(symbol, stage, self.to_string())
    }
}

/// Dimensions and initialisation seed for a new predictor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictorSpec {
    pub sequence_length: usize,
    pub n_features: usize,
    pub hidden_size: usize,
    pub seed: u64,
}

pub trait Predictor: Send + Sync {
    fn kind(&self) -> PredictorKind;

    /// `(sequence_length, n_features)` expected by [`Predictor::infer`].
    fn input_shape(&self) -> (usize, usize);

    fn infer(&self, window: ArrayView2<'_, f64>) -> Result<f64, PredictorError>;

    /// Mean squared error over the batch and its gradient with respect to
    /// [`Predictor::parameters`].
    fn loss_gradient(
        &self,
        windows: &[ArrayView2<'_, f64>],
        targets: &[f64],
    ) -> Result<(f64, Array1<f64>), PredictorError>;

    fn parameters(&self) -> Array1<f64>;

    fn set_parameters(&mut self, parameters: &Array1<f64>) -> Result<(), PredictorError>;

    fn parameter_count(&self) -> usize {
        self.parameters().len()
    }

    fn check_input(&self, window: &ArrayView2<'_, f64>) -> Result<(), PredictorError> {
        let expected = self.input_shape();
        let actual = (window.nrows(), window.ncols());
        if expected != actual {
            return Err(PredictorError::InputShape { expected, actual });
        }
        Ok(())
    }
}

/// Fresh, untrained predictor of `kind`.
pub fn build_predictor(kind: PredictorKind, spec: PredictorSpec) -> Box<dyn Predictor> {
    match kind {
        PredictorKind::Linear => Box::new(LinearPredictor::new(spec.sequence_length, spec.n_features)),
        PredictorKind::Mlp => Box::new(MlpPredictor::new(
            spec.sequence_length,
            spec.n_features,
            spec.hidden_size,
            spec.seed,
        )),
    }
}

/// Persisted predictor: its kind, dimensions and trained parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorState {
    pub kind: PredictorKind,
    pub spec: PredictorSpec,
    pub parameters: Vec<f64>,
}

impl PredictorState {
    pub fn capture(predictor: &dyn Predictor, spec: PredictorSpec) -> Self {
        Self {
            kind: predictor.kind(),
            spec,
            parameters: predictor.parameters().to_vec(),
        }
    }

    /// Rebuild the predictor and load the saved parameters into it.
    pub fn restore(&self) -> Result<Box<dyn Predictor>, PredictorError> {
        let mut predictor = build_predictor(self.kind, self.spec);
        predictor.set_parameters(&Array1::from_vec(self.parameters.clone()))?;
        Ok(predictor)
    }
}

pub(crate) fn flatten(window: &ArrayView2<'_, f64>) -> Array1<f64> {
    window.iter().copied().collect()
}

pub(crate) fn check_batch(windows: usize, targets: usize) -> Result<(), PredictorError> {
    if windows != targets || windows == 0 {
        return Err(PredictorError::Batch { windows, targets });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn spec() -> PredictorSpec {
        PredictorSpec {
            sequence_length: 4,
            n_features: 3,
            hidden_size: 5,
            seed: 7,
        }
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(PredictorKind::from_str("MLP"), Some(PredictorKind::Mlp));
        assert_eq!(PredictorKind::from_str("lstm"), None);
        assert_eq!(
            serde_json::to_string(&PredictorKind::Linear).unwrap(),
            "\"linear\""
        );
    }

    #[test]
    fn test_state_restore_reproduces_inference() {
        for kind in PredictorKind::ALL {
            let mut predictor = build_predictor(kind, spec());
            let mut params = predictor.parameters();
            for (i, p) in params.iter_mut().enumerate() {
                *p += (i % 7) as f64 * 0.01;
            }
            predictor.set_parameters(&params).unwrap();

            let state = PredictorState::capture(predictor.as_ref(), spec());
            let json = serde_json::to_string(&state).unwrap();
            let restored = serde_json::from_str::<PredictorState>(&json)
                .unwrap()
                .restore()
                .unwrap();

            let window = Array2::from_shape_fn((4, 3), |(r, c)| (r as f64 - c as f64) * 0.3);
            let a = predictor.infer(window.view()).unwrap();
            let b = restored.infer(window.view()).unwrap();
            assert!((a - b).abs() < 1e-12, "{}", kind);
        }
    }

    #[test]
    fn test_wrong_parameter_count_rejected() {
        let state = PredictorState {
            kind: PredictorKind::Linear,
            spec: spec(),
            parameters: vec![0.0; 3],
        };
        assert_eq!(
            state.restore().err(),
            Some(PredictorError::ParameterCount {
                expected: 13,
                actual: 3
            })
        );
    }

    #[test]
    fn test_input_shape_checked() {
        let predictor = build_predictor(PredictorKind::Mlp, spec());
        let err = predictor.infer(Array2::<f64>::zeros((3, 3)).view()).unwrap_err();
        assert!(matches!(err, PredictorError::InputShape { .. }));
    }

    /// Central-difference check of the analytic gradient.
    #[test]
    fn test_gradients_match_finite_differences() {
        for kind in PredictorKind::ALL {
            let mut predictor = build_predictor(kind, spec());
            let base: Array1<f64> = predictor
                .parameters()
                .iter()
                .enumerate()
                .map(|(i, p)| p + ((i * 37 % 11) as f64 - 5.0) * 0.02)
                .collect();
            predictor.set_parameters(&base).unwrap();

            let windows: Vec<Array2<f64>> = (0..3)
                .map(|k| Array2::from_shape_fn((4, 3), |(r, c)| ((r + k) as f64 * 0.2 - c as f64 * 0.1).sin()))
                .collect();
            let views: Vec<_> = windows.iter().map(|w| w.view()).collect();
            let targets = [0.3, -0.2, 0.5];

            let (_, grad) = predictor.loss_gradient(&views, &targets).unwrap();
            let eps = 1e-6;
            for idx in [0, 5, base.len() / 2, base.len() - 1] {
                let mut plus = base.clone();
                plus[idx] += eps;
                predictor.set_parameters(&plus).unwrap();
                let (lp, _) = predictor.loss_gradient(&views, &targets).unwrap();

                let mut minus = base.clone();
                minus[idx] -= eps;
                predictor.set_parameters(&minus).unwrap();
                let (lm, _) = predictor.loss_gradient(&views, &targets).unwrap();

                let numeric = (lp - lm) / (2.0 * eps);
                assert!(
                    (numeric - grad[idx]).abs() < 1e-5,
                    "{} param {}: numeric {} analytic {}",
                    kind,
                    idx,
                    numeric,
                    grad[idx]
                );
            }
            predictor.set_parameters(&base).unwrap();
        }
    }
}
