//! Epoch loop: Adam with gradient clipping, plateau learning-rate schedule,
//! early stopping and best-snapshot restore.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{ForecastError, Stage};
use crate::services::predictor::{Predictor, PredictorError};
use crate::services::windows::WindowSet;
use crate::types::Hyperparameters;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("validation set is empty")]
    EmptyValidationSet,

    #[error("loss diverged at epoch {epoch} (loss = {loss})")]
    Diverged { epoch: usize, loss: f64 },

    #[error(transparent)]
    Predictor(#[from] PredictorError),

    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[from] std::io::Error),
}

impl TrainingError {
    pub fn at(self, symbol: &str) -> ForecastError {
        match self {
            TrainingError::EmptyTrainingSet | TrainingError::EmptyValidationSet => {
                ForecastError::insufficient(symbol, Stage::Training, self.to_string())
            }
            TrainingError::Diverged { epoch, loss } => ForecastError::DivergedTraining {
                symbol: symbol.to_string(),
                epoch,
                loss,
            },
            TrainingError::Predictor(e) => e.at(symbol, Stage::Training),
            TrainingError::Checkpoint(e) => ForecastError::Io(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EarlyStopped,
    MaxEpochsReached,
    Cancelled,
}

/// Summary of one training run. Epochs are numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub learning_rates: Vec<f64>,
    pub stop_reason: StopReason,
    pub training_time_secs: f64,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub max_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub early_stopping_patience: usize,
    pub scheduler_patience: usize,
    pub scheduler_factor: f64,
    pub gradient_clip: f64,
    pub seed: u64,
    pub cancel: Option<Arc<AtomicBool>>,
    pub deadline: Option<Instant>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_epochs: 100,
            batch_size: 32,
            learning_rate: 0.001,
            weight_decay: 1e-5,
            early_stopping_patience: 10,
            scheduler_patience: 5,
            scheduler_factor: 0.5,
            gradient_clip: 1.0,
            seed: 42,
            cancel: None,
            deadline: None,
        }
    }
}

impl TrainingConfig {
    pub fn from_hyperparameters(hp: &Hyperparameters) -> Self {
        Self {
            max_epochs: hp.epochs,
            batch_size: hp.batch_size.max(1),
            learning_rate: hp.learning_rate,
            weight_decay: hp.weight_decay,
            early_stopping_patience: hp.early_stopping_patience,
            scheduler_patience: hp.scheduler_patience,
            seed: hp.seed,
            ..Self::default()
        }
    }

    fn cancelled(&self) -> bool {
        let flagged = self
            .cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false);
        let expired = self.deadline.map(|d| Instant::now() >= d).unwrap_or(false);
        flagged || expired
    }
}

/// Receives the best parameters each time validation loss improves.
pub trait CheckpointSink {
    fn save(&mut self, epoch: usize, val_loss: f64, parameters: &Array1<f64>) -> std::io::Result<()>;
}

#[derive(Serialize)]
struct CheckpointFile<'a> {
    epoch: usize,
    val_loss: f64,
    parameters: &'a [f64],
}

/// Writes the latest best parameters to a JSON file, replacing it atomically.
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckpointSink for FileCheckpoint {
    fn save(&mut self, epoch: usize, val_loss: f64, parameters: &Array1<f64>) -> std::io::Result<()> {
        let params = parameters.to_vec();
        let body = CheckpointFile {
            epoch,
            val_loss,
            parameters: &params,
        };
        let json = serde_json::to_vec(&body)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }
}

/// Adam with L2 weight decay folded into the gradient.
struct Adam {
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
}

impl Adam {
    fn new(size: usize, weight_decay: f64) -> Self {
        Self {
            m: Array1::zeros(size),
            v: Array1::zeros(size),
            t: 0,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
        }
    }

    fn step(&mut self, params: &mut Array1<f64>, grad: &Array1<f64>, lr: f64) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t);
        let bc2 = 1.0 - self.beta2.powi(self.t);
        for i in 0..params.len() {
            let g = grad[i] + self.weight_decay * params[i];
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Multiplies the learning rate by `factor` once `patience` consecutive
/// epochs pass without a strictly lower validation loss.
struct PlateauScheduler {
    lr: f64,
    factor: f64,
    patience: usize,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    fn new(lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            lr,
            factor,
            patience,
            best: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    fn step(&mut self, val_loss: f64) {
        if val_loss < self.best {
            self.best = val_loss;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
            if self.bad_epochs >= self.patience.max(1) {
                self.lr *= self.factor;
                self.bad_epochs = 0;
                debug!("learning rate reduced to {:.3e}", self.lr);
            }
        }
    }
}

/// Scale `grad` so its L2 norm is at most `max_norm`.
pub fn clip_gradient(grad: &mut Array1<f64>, max_norm: f64) -> f64 {
    let norm = grad.dot(grad).sqrt();
    if norm > max_norm && norm > 0.0 {
        grad.mapv_inplace(|g| g * max_norm / norm);
    }
    norm
}

/// Mean squared error of `predictor` over every window in `set`.
pub fn mean_squared_error(predictor: &dyn Predictor, set: &WindowSet) -> Result<f64, PredictorError> {
    let mut total = 0.0;
    for i in 0..set.len() {
        let err = predictor.infer(set.window(i))? - set.target(i);
        total += err * err;
    }
    Ok(total / set.len() as f64)
}

pub struct TrainingController {
    config: TrainingConfig,
}

impl TrainingController {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `predictor` in place and leave it holding the parameters of the
    /// epoch with the lowest validation loss.
    pub fn train(
        &self,
        predictor: &mut dyn Predictor,
        train: &WindowSet,
        validation: &WindowSet,
        mut checkpoint: Option<&mut dyn CheckpointSink>,
    ) -> Result<TrainingHistory, TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }
        if validation.is_empty() {
            return Err(TrainingError::EmptyValidationSet);
        }

        let cfg = &self.config;
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut params = predictor.parameters();
        let mut adam = Adam::new(params.len(), cfg.weight_decay);
        let mut scheduler = PlateauScheduler::new(cfg.learning_rate, cfg.scheduler_factor, cfg.scheduler_patience);

        let mut best_params = params.clone();
        let mut best_val_loss = f64::INFINITY;
        let mut best_epoch = 0;
        let mut since_improvement = 0;
        let mut train_losses = Vec::new();
        let mut val_losses = Vec::new();
        let mut learning_rates = Vec::new();
        let mut stop_reason = StopReason::MaxEpochsReached;

        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in 1..=cfg.max_epochs {
            let lr = scheduler.lr;
            order.shuffle(&mut rng);

            let mut loss_sum = 0.0;
            for batch in order.chunks(cfg.batch_size.max(1)) {
                let windows: Vec<_> = batch.iter().map(|&i| train.window(i)).collect();
                let targets: Vec<f64> = batch.iter().map(|&i| train.target(i)).collect();
                let (loss, mut grad) = predictor.loss_gradient(&windows, &targets)?;
                if !loss.is_finite() {
                    return Err(TrainingError::Diverged { epoch, loss });
                }
                loss_sum += loss * batch.len() as f64;

                clip_gradient(&mut grad, cfg.gradient_clip);
                adam.step(&mut params, &grad, lr);
                predictor.set_parameters(&params)?;
            }
            let train_loss = loss_sum / train.len() as f64;

            let val_loss = mean_squared_error(predictor, validation)?;
            if !val_loss.is_finite() {
                return Err(TrainingError::Diverged { epoch, loss: val_loss });
            }

            train_losses.push(train_loss);
            val_losses.push(val_loss);
            learning_rates.push(lr);
            scheduler.step(val_loss);

            if val_loss < best_val_loss {
                best_val_loss = val_loss;
                best_epoch = epoch;
                best_params = params.clone();
                since_improvement = 0;
                if let Some(sink) = checkpoint.as_mut() {
                    sink.save(epoch, val_loss, &best_params)?;
                }
            } else {
                since_improvement += 1;
            }

            info!(
                "epoch {}/{}: train_loss={:.6} val_loss={:.6} lr={:.2e}",
                epoch, cfg.max_epochs, train_loss, val_loss, lr
            );

            if since_improvement >= cfg.early_stopping_patience.max(1) {
                stop_reason = StopReason::EarlyStopped;
                break;
            }
            if cfg.cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }
        }

        predictor.set_parameters(&best_params)?;

        let history = TrainingHistory {
            epochs_run: val_losses.len(),
            best_epoch,
            best_val_loss,
            train_losses,
            val_losses,
            learning_rates,
            stop_reason,
            training_time_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            "training finished after {} epochs ({:?}), best epoch {} with val_loss={:.6}",
            history.epochs_run, history.stop_reason, history.best_epoch, history.best_val_loss
        );
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::predictor::PredictorKind;
    use crate::services::windows::WindowBuilder;
    use ndarray::{Array2, ArrayView2};

    /// One-parameter model whose output is the parameter itself and whose
    /// gradient is a fixed constant, so each Adam step moves it by ~lr.
    struct Scripted {
        p: f64,
        grad: f64,
        loss: f64,
    }

    impl Predictor for Scripted {
        fn kind(&self) -> PredictorKind {
            PredictorKind::Linear
        }
        fn input_shape(&self) -> (usize, usize) {
            (1, 1)
        }
        fn infer(&self, _window: ArrayView2<'_, f64>) -> Result<f64, PredictorError> {
            Ok(self.p)
        }
        fn loss_gradient(
            &self,
            _windows: &[ArrayView2<'_, f64>],
            _targets: &[f64],
        ) -> Result<(f64, Array1<f64>), PredictorError> {
            Ok((self.loss, Array1::from_elem(1, self.grad)))
        }
        fn parameters(&self) -> Array1<f64> {
            Array1::from_elem(1, self.p)
        }
        fn set_parameters(&mut self, parameters: &Array1<f64>) -> Result<(), PredictorError> {
            self.p = parameters[0];
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        saved: Vec<(usize, Array1<f64>)>,
    }

    impl CheckpointSink for Recorder {
        fn save(&mut self, epoch: usize, _val_loss: f64, parameters: &Array1<f64>) -> std::io::Result<()> {
            self.saved.push((epoch, parameters.clone()));
            Ok(())
        }
    }

    /// A window set of `count` windows whose targets all equal `target`.
    fn constant_set(count: usize, target: f64) -> WindowSet {
        let builder = WindowBuilder::new(1, 1).unwrap();
        let rows = count + 1;
        builder
            .build_with_targets(Array2::zeros((rows, 1)), &vec![target; rows])
            .unwrap()
    }

    fn config(max_epochs: usize, patience: usize) -> TrainingConfig {
        TrainingConfig {
            max_epochs,
            batch_size: 8,
            learning_rate: 0.1,
            weight_decay: 0.0,
            early_stopping_patience: patience,
            scheduler_patience: 100,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_stops_patience_epochs_after_best_and_restores_it() {
        let mut model = Scripted { p: 0.0, grad: -1.0, loss: 1.0 };
        let mut recorder = Recorder::default();
        let controller = TrainingController::new(config(50, 3));

        // p climbs ~0.1 per epoch; validation loss bottoms out at p = 0.5
        let history = controller
            .train(&mut model, &constant_set(1, 0.0), &constant_set(1, 0.52), Some(&mut recorder))
            .unwrap();

        assert_eq!(history.best_epoch, 5);
        assert_eq!(history.epochs_run, 8);
        assert_eq!(history.stop_reason, StopReason::EarlyStopped);
        assert!((model.p - 0.5).abs() < 1e-6);

        let (epoch, snapshot) = recorder.saved.last().unwrap();
        assert_eq!(*epoch, 5);
        assert_eq!(model.parameters(), *snapshot);
        assert!(history.val_losses[7] > history.best_val_loss);
    }

    #[test]
    fn test_max_epochs_reached() {
        let mut model = Scripted { p: 0.0, grad: -1.0, loss: 1.0 };
        let controller = TrainingController::new(config(4, 10));
        let history = controller
            .train(&mut model, &constant_set(2, 0.0), &constant_set(1, 5.0), None)
            .unwrap();
        assert_eq!(history.epochs_run, 4);
        assert_eq!(history.stop_reason, StopReason::MaxEpochsReached);
        assert_eq!(history.train_losses.len(), 4);
        assert_eq!(history.learning_rates, vec![0.1; 4]);
    }

    #[test]
    fn test_empty_validation_fails_fast() {
        let mut model = Scripted { p: 0.0, grad: -1.0, loss: 1.0 };
        let controller = TrainingController::new(config(4, 10));
        let err = controller
            .train(&mut model, &constant_set(2, 0.0), &constant_set(0, 0.0), None)
            .unwrap_err();
        assert!(matches!(err, TrainingError::EmptyValidationSet));
        assert!(matches!(err.at("BTCUSDT"), ForecastError::InsufficientData { .. }));
    }

    #[test]
    fn test_non_finite_loss_diverges() {
        let mut model = Scripted { p: 0.0, grad: -1.0, loss: f64::NAN };
        let controller = TrainingController::new(config(4, 10));
        let err = controller
            .train(&mut model, &constant_set(2, 0.0), &constant_set(1, 0.0), None)
            .unwrap_err();
        assert!(matches!(err, TrainingError::Diverged { epoch: 1, .. }));
    }

    #[test]
    fn test_plateau_halves_learning_rate() {
        // gradient pushes p away from the validation target, so every epoch
        // after the first is a plateau epoch
        let mut model = Scripted { p: 0.0, grad: 1.0, loss: 1.0 };
        let mut cfg = config(6, 100);
        cfg.scheduler_patience = 2;
        let controller = TrainingController::new(cfg);
        let history = controller
            .train(&mut model, &constant_set(1, 0.0), &constant_set(1, 10.0), None)
            .unwrap();
        assert_eq!(history.best_epoch, 1);
        assert_eq!(history.learning_rates, vec![0.1, 0.1, 0.1, 0.05, 0.05, 0.025]);
    }

    #[test]
    fn test_cancel_flag_stops_after_current_epoch() {
        let mut model = Scripted { p: 0.0, grad: -1.0, loss: 1.0 };
        let flag = Arc::new(AtomicBool::new(true));
        let mut cfg = config(50, 10);
        cfg.cancel = Some(flag);
        let history = TrainingController::new(cfg)
            .train(&mut model, &constant_set(1, 0.0), &constant_set(1, 1.0), None)
            .unwrap();
        assert_eq!(history.epochs_run, 1);
        assert_eq!(history.stop_reason, StopReason::Cancelled);
    }

    #[test]
    fn test_clip_gradient() {
        let mut g = ndarray::array![3.0, 4.0];
        let norm = clip_gradient(&mut g, 1.0);
        assert_eq!(norm, 5.0);
        assert!((g[0] - 0.6).abs() < 1e-12 && (g[1] - 0.8).abs() < 1e-12);

        let mut small = ndarray::array![0.3, 0.4];
        clip_gradient(&mut small, 1.0);
        assert_eq!(small, ndarray::array![0.3, 0.4]);
    }

    #[test]
    fn test_file_checkpoint_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt").join("best.json");
        let mut sink = FileCheckpoint::new(&path);
        sink.save(3, 0.25, &ndarray::array![1.0, 2.0]).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["epoch"], 3);
        assert_eq!(v["parameters"][1], 2.0);
    }
}
