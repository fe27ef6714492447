use ndarray::{Array1, ArrayView2};

use super::{check_batch, flatten, Predictor, PredictorError, PredictorKind};

/// `y = w . flatten(window) + b`, initialised at zero.
#[derive(Debug, Clone)]
pub struct LinearPredictor {
    sequence_length: usize,
    n_features: usize,
    weights: Array1<f64>,
    bias: f64,
}

impl LinearPredictor {
    pub fn new(sequence_length: usize, n_features: usize) -> Self {
        Self {
            sequence_length,
            n_features,
            weights: Array1::zeros(sequence_length * n_features),
            bias: 0.0,
        }
    }

    fn forward(&self, x: &Array1<f64>) -> f64 {
        self.weights.dot(x) + self.bias
    }
}

impl Predictor for LinearPredictor {
    fn kind(&self) -> PredictorKind {
        PredictorKind::Linear
    }

    fn input_shape(&self) -> (usize, usize) {
        (self.sequence_length, self.n_features)
    }

    fn infer(&self, window: ArrayView2<'_, f64>) -> Result<f64, PredictorError> {
        self.check_input(&window)?;
        Ok(self.forward(&flatten(&window)))
    }

    fn loss_gradient(
        &self,
        windows: &[ArrayView2<'_, f64>],
        targets: &[f64],
    ) -> Result<(f64, Array1<f64>), PredictorError> {
        check_batch(windows.len(), targets.len())?;
        let n = windows.len() as f64;
        let dim = self.weights.len();
        let mut grad = Array1::zeros(dim + 1);
        let mut loss = 0.0;

        for (window, &target) in windows.iter().zip(targets) {
            self.check_input(window)?;
            let x = flatten(window);
            let err = self.forward(&x) - target;
            loss += err * err;

            let d = 2.0 * err / n;
            grad.slice_mut(ndarray::s![..dim]).scaled_add(d, &x);
            grad[dim] += d;
        }
        Ok((loss / n, grad))
    }

    fn parameters(&self) -> Array1<f64> {
        let mut p = Array1::zeros(self.weights.len() + 1);
        p.slice_mut(ndarray::s![..self.weights.len()]).assign(&self.weights);
        p[self.weights.len()] = self.bias;
        p
    }

    fn set_parameters(&mut self, parameters: &Array1<f64>) -> Result<(), PredictorError> {
        let dim = self.weights.len();
        if parameters.len() != dim + 1 {
            return Err(PredictorError::ParameterCount {
                expected: dim + 1,
                actual: parameters.len(),
            });
        }
        self.weights.assign(&parameters.slice(ndarray::s![..dim]));
        self.bias = parameters[dim];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_zero_initialised() {
        let p = LinearPredictor::new(3, 2);
        assert_eq!(p.parameter_count(), 7);
        assert!(p.parameters().iter().all(|v| *v == 0.0));
        assert_eq!(p.infer(Array2::<f64>::ones((3, 2)).view()).unwrap(), 0.0);
    }

    #[test]
    fn test_known_output() {
        let mut p = LinearPredictor::new(2, 1);
        p.set_parameters(&array![1.0, 2.0, 0.5]).unwrap();
        let y = p.infer(array![[3.0], [4.0]].view()).unwrap();
        assert_eq!(y, 3.0 + 8.0 + 0.5);
    }

    #[test]
    fn test_gradient_on_single_example() {
        let p = LinearPredictor::new(1, 2);
        let window = array![[1.0, 2.0]];
        let (loss, grad) = p.loss_gradient(&[window.view()], &[1.0]).unwrap();
        // prediction 0, error -1
        assert_eq!(loss, 1.0);
        assert_eq!(grad.to_vec(), vec![-2.0, -4.0, -2.0]);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let p = LinearPredictor::new(1, 1);
        assert!(p.loss_gradient(&[], &[]).is_err());
    }
}
