use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{check_batch, flatten, Predictor, PredictorError, PredictorKind};

/// Single hidden layer: `y = w2 . tanh(W1 x + b1) + b2` over the flattened window.
///
/// Parameters are laid out as `W1` (row-major), `b1`, `w2`, `b2`. Weights use
/// Xavier-uniform initialisation from a seeded RNG so training is reproducible.
#[derive(Debug, Clone)]
pub struct MlpPredictor {
    sequence_length: usize,
    n_features: usize,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: f64,
}

impl MlpPredictor {
    pub fn new(sequence_length: usize, n_features: usize, hidden_size: usize, seed: u64) -> Self {
        let input = sequence_length * n_features;
        let hidden = hidden_size.max(1);
        let mut rng = StdRng::seed_from_u64(seed);

        let limit1 = (6.0 / (input + hidden) as f64).sqrt();
        let w1 = Array2::from_shape_fn((hidden, input), |_| rng.gen_range(-limit1..limit1));
        let limit2 = (6.0 / (hidden + 1) as f64).sqrt();
        let w2 = Array1::from_shape_fn(hidden, |_| rng.gen_range(-limit2..limit2));

        Self {
            sequence_length,
            n_features,
            w1,
            b1: Array1::zeros(hidden),
            w2,
            b2: 0.0,
        }
    }

    fn hidden_size(&self) -> usize {
        self.w1.nrows()
    }

    fn forward(&self, x: &Array1<f64>) -> (Array1<f64>, f64) {
        let h = (self.w1.dot(x) + &self.b1).mapv(f64::tanh);
        let y = self.w2.dot(&h) + self.b2;
        (h, y)
    }
}

impl Predictor for MlpPredictor {
    fn kind(&self) -> PredictorKind {
        PredictorKind::Mlp
    }

    fn input_shape(&self) -> (usize, usize) {
        (self.sequence_length, self.n_features)
    }

    fn infer(&self, window: ArrayView2<'_, f64>) -> Result<f64, PredictorError> {
        self.check_input(&window)?;
        Ok(self.forward(&flatten(&window)).1)
    }

    fn loss_gradient(
        &self,
        windows: &[ArrayView2<'_, f64>],
        targets: &[f64],
    ) -> Result<(f64, Array1<f64>), PredictorError> {
        check_batch(windows.len(), targets.len())?;
        let n = windows.len() as f64;
        let hidden = self.hidden_size();

        let mut g_w1 = Array2::<f64>::zeros(self.w1.raw_dim());
        let mut g_b1 = Array1::<f64>::zeros(hidden);
        let mut g_w2 = Array1::<f64>::zeros(hidden);
        let mut g_b2 = 0.0;
        let mut loss = 0.0;

        for (window, &target) in windows.iter().zip(targets) {
            self.check_input(window)?;
            let x = flatten(window);
            let (h, y) = self.forward(&x);
            let err = y - target;
            loss += err * err;

            let dy = 2.0 * err / n;
            g_w2.scaled_add(dy, &h);
            g_b2 += dy;

            // d tanh = 1 - h^2
            let dz: Array1<f64> = self
                .w2
                .iter()
                .zip(h.iter())
                .map(|(w, hv)| dy * w * (1.0 - hv * hv))
                .collect();
            for (mut row, &d) in g_w1.axis_iter_mut(Axis(0)).zip(dz.iter()) {
                row.scaled_add(d, &x);
            }
            g_b1 += &dz;
        }

        let mut grad = Vec::with_capacity(self.parameter_count());
        grad.extend(g_w1.iter());
        grad.extend(g_b1.iter());
        grad.extend(g_w2.iter());
        grad.push(g_b2);
        Ok((loss / n, Array1::from_vec(grad)))
    }

    fn parameters(&self) -> Array1<f64> {
        let mut p = Vec::with_capacity(self.w1.len() + 2 * self.hidden_size() + 1);
        p.extend(self.w1.iter());
        p.extend(self.b1.iter());
        p.extend(self.w2.iter());
        p.push(self.b2);
        Array1::from_vec(p)
    }

    fn parameter_count(&self) -> usize {
        self.w1.len() + 2 * self.hidden_size() + 1
    }

    fn set_parameters(&mut self, parameters: &Array1<f64>) -> Result<(), PredictorError> {
        let expected = self.parameter_count();
        if parameters.len() != expected {
            return Err(PredictorError::ParameterCount {
                expected,
                actual: parameters.len(),
            });
        }
        let n_w1 = self.w1.len();
        let hidden = self.hidden_size();
        let shape = self.w1.raw_dim();

        let w1 = parameters.slice(s![..n_w1]).to_owned();
        self.w1 = w1
            .into_shape(shape)
            .map_err(|_| PredictorError::ParameterCount {
                expected,
                actual: parameters.len(),
            })?;
        self.b1.assign(&parameters.slice(s![n_w1..n_w1 + hidden]));
        self.w2.assign(&parameters.slice(s![n_w1 + hidden..n_w1 + 2 * hidden]));
        self.b2 = parameters[expected - 1];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a = MlpPredictor::new(5, 4, 8, 11);
        let b = MlpPredictor::new(5, 4, 8, 11);
        let c = MlpPredictor::new(5, 4, 8, 12);
        assert_eq!(a.parameters(), b.parameters());
        assert_ne!(a.parameters(), c.parameters());
    }

    #[test]
    fn test_parameter_layout() {
        let p = MlpPredictor::new(5, 4, 8, 1);
        assert_eq!(p.parameter_count(), 20 * 8 + 8 + 8 + 1);
        assert_eq!(p.parameters().len(), p.parameter_count());
    }

    #[test]
    fn test_set_parameters_roundtrip() {
        let mut p = MlpPredictor::new(2, 2, 3, 1);
        let params: Array1<f64> = (0..p.parameter_count()).map(|i| i as f64 * 0.1).collect();
        p.set_parameters(&params).unwrap();
        assert_eq!(p.parameters(), params);
    }

    #[test]
    fn test_output_bounded_by_hidden_weights() {
        let p = MlpPredictor::new(3, 2, 4, 3);
        let big = Array2::from_elem((3, 2), 1e6);
        let y = p.infer(big.view()).unwrap();
        let bound: f64 = p.w2.iter().map(|w| w.abs()).sum::<f64>() + p.b2.abs();
        assert!(y.abs() <= bound + 1e-9);
    }
}
