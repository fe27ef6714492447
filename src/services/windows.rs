//! Supervised windows over a feature matrix.
//!
//! Windows are index ranges into one shared matrix; nothing is copied until a
//! caller asks for a batch.

use ndarray::{s, Array2, ArrayView2};
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

use crate::error::{ForecastError, Stage};

/// Fraction of windows used for training.
pub const TRAIN_FRACTION: f64 = 0.7;
/// Fraction of windows used for validation; the remainder is the test split.
pub const VALIDATION_FRACTION: f64 = 0.15;

#[derive(Error, Debug, PartialEq)]
pub enum WindowError {
    #[error("sequence length and horizon must be at least 1")]
    ZeroLength,

    #[error("target column {column} out of range for {ncols} columns")]
    ColumnOutOfRange { column: usize, ncols: usize },

    #[error("{actual} targets for {expected} feature rows")]
    TargetLength { expected: usize, actual: usize },

    #[error("window starting at row {start} runs past {rows} rows")]
    StartOutOfRange { start: usize, rows: usize },
}

impl WindowError {
    pub fn at(self, symbol: &str) -> ForecastError {
        ForecastError::shape(symbol, Stage::Windowing, self.to_string())
    }
}

/// Ordered windows sharing one feature matrix.
#[derive(Debug, Clone)]
pub struct WindowSet {
    matrix: Arc<Array2<f64>>,
    starts: Vec<usize>,
    targets: Vec<f64>,
    sequence_length: usize,
    horizon: usize,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn n_features(&self) -> usize {
        self.matrix.ncols()
    }

    /// Feature rows of window `i`.
    pub fn window(&self, i: usize) -> ArrayView2<'_, f64> {
        let start = self.starts[i];
        self.matrix.slice(s![start..start + self.sequence_length, ..])
    }

    pub fn target(&self, i: usize) -> f64 {
        self.targets[i]
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    /// Matrix row holding the last observation of window `i`.
    pub fn last_row(&self, i: usize) -> usize {
        self.starts[i] + self.sequence_length - 1
    }

    /// Matrix row the target of window `i` was taken from.
    pub fn target_row(&self, i: usize) -> usize {
        self.starts[i] + self.sequence_length + self.horizon - 1
    }

    /// Contiguous sub-range of windows, sharing the same matrix.
    pub fn subset(&self, range: Range<usize>) -> WindowSet {
        WindowSet {
            matrix: Arc::clone(&self.matrix),
            starts: self.starts[range.clone()].to_vec(),
            targets: self.targets[range].to_vec(),
            sequence_length: self.sequence_length,
            horizon: self.horizon,
        }
    }
}

/// Chronological train / validation / test partition.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: WindowSet,
    pub validation: WindowSet,
    pub test: WindowSet,
}

/// Partition sizes for `n` windows: floor of each fraction, test takes the rest.
pub fn split_sizes(n: usize, train_fraction: f64, validation_fraction: f64) -> (usize, usize, usize) {
    let train = (n as f64 * train_fraction).floor() as usize;
    let validation = ((n as f64 * validation_fraction).floor() as usize).min(n - train);
    (train, validation, n - train - validation)
}

/// Split windows in time order; earliest windows train, latest test.
pub fn chronological_split(windows: &WindowSet, train_fraction: f64, validation_fraction: f64) -> Split {
    let (train, validation, _) = split_sizes(windows.len(), train_fraction, validation_fraction);
    Split {
        train: windows.subset(0..train),
        validation: windows.subset(train..train + validation),
        test: windows.subset(train + validation..windows.len()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowBuilder {
    sequence_length: usize,
    horizon: usize,
}

impl WindowBuilder {
    pub fn new(sequence_length: usize, horizon: usize) -> Result<Self, WindowError> {
        if sequence_length == 0 || horizon == 0 {
            return Err(WindowError::ZeroLength);
        }
        Ok(Self {
            sequence_length,
            horizon,
        })
    }

    /// Number of windows a matrix of `rows` rows yields.
    pub fn window_count(&self, rows: usize) -> usize {
        (rows + 1).saturating_sub(self.sequence_length + self.horizon)
    }

    /// Windows over `matrix` whose target is `target_column` one horizon past
    /// each window's last row.
    pub fn build(&self, matrix: Array2<f64>, target_column: usize) -> Result<WindowSet, WindowError> {
        if target_column >= matrix.ncols() {
            return Err(WindowError::ColumnOutOfRange {
                column: target_column,
                ncols: matrix.ncols(),
            });
        }
        let targets: Vec<f64> = matrix.column(target_column).to_vec();
        self.build_with_targets(matrix, &targets)
    }

    /// Same as [`WindowBuilder::build`] against a separate row-aligned target series.
    pub fn build_with_targets(&self, features: Array2<f64>, targets: &[f64]) -> Result<WindowSet, WindowError> {
        let starts = (0..self.window_count(features.nrows())).collect();
        self.build_at(features, targets, starts)
    }

    /// Start rows of the windows whose rows and target row are consecutive
    /// candles `step_ms` apart. Windows over a hole in `timestamps` are left out.
    pub fn consecutive_starts(&self, timestamps: &[i64], step_ms: i64) -> Vec<usize> {
        let mut run_start = vec![0; timestamps.len()];
        for row in 1..timestamps.len() {
            run_start[row] = if timestamps[row] - timestamps[row - 1] == step_ms {
                run_start[row - 1]
            } else {
                row
            };
        }
        let span = self.sequence_length + self.horizon - 1;
        (0..self.window_count(timestamps.len()))
            .filter(|&i| run_start[i + span] <= i)
            .collect()
    }

    /// Windows beginning at the given rows, in the order given.
    pub fn build_at(&self, features: Array2<f64>, targets: &[f64], starts: Vec<usize>) -> Result<WindowSet, WindowError> {
        if targets.len() != features.nrows() {
            return Err(WindowError::TargetLength {
                expected: features.nrows(),
                actual: targets.len(),
            });
        }
        let span = self.sequence_length + self.horizon - 1;
        if let Some(&start) = starts.iter().find(|&&i| i + span >= features.nrows()) {
            return Err(WindowError::StartOutOfRange {
                start,
                rows: features.nrows(),
            });
        }
        let window_targets = starts
            .iter()
            .map(|&i| targets[i + self.sequence_length + self.horizon - 1])
            .collect();

        Ok(WindowSet {
            matrix: Arc::new(features),
            starts,
            targets: window_targets,
            sequence_length: self.sequence_length,
            horizon: self.horizon,
        })
    }

    /// The newest `sequence_length` rows, for inference.
    pub fn last_window<'a>(&self, matrix: ArrayView2<'a, f64>) -> Option<ArrayView2<'a, f64>> {
        let rows = matrix.nrows();
        if rows < self.sequence_length {
            return None;
        }
        Some(matrix.slice_move(s![rows - self.sequence_length.., ..]))
    }
}
