//! Combine several trained models into one forecast.

use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ForecastError, Result};
use crate::services::forecast::LoadedModel;
use crate::services::predictor::PredictorKind;
use crate::services::registry::ModelArtifact;
use crate::types::{
    Candle, EnsembleResult, EnsembleStrategy, ModelFailure, ModelPrediction, Votes, DEFAULT_MODEL_WEIGHT,
};

/// Result of running one member model.
#[derive(Debug)]
pub struct MemberOutcome {
    pub model: String,
    pub weight: f64,
    pub prediction: Result<f64>,
}

pub struct EnsembleCombiner {
    strategy: EnsembleStrategy,
}

impl EnsembleCombiner {
    pub fn new(strategy: EnsembleStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> EnsembleStrategy {
        self.strategy
    }

    /// Run every member's full inference path on its own blocking task and
    /// merge the survivors. Members that failed to load count as failures.
    pub async fn predict(
        &self,
        symbol: &str,
        candles: Arc<Vec<Candle>>,
        horizon_candles: usize,
        members: Vec<(PredictorKind, Result<Arc<ModelArtifact>>)>,
    ) -> Result<EnsembleResult> {
        if members.is_empty() {
            return Err(ForecastError::NoModelsAvailable {
                symbol: symbol.to_string(),
            });
        }

        let mut names = Vec::with_capacity(members.len());
        let mut tasks = Vec::with_capacity(members.len());
        for (kind, loaded) in members {
            names.push(kind.to_string());
            let candles = Arc::clone(&candles);
            tasks.push(tokio::task::spawn_blocking(move || -> (f64, Result<f64>) {
                let artifact = match loaded {
                    Ok(a) => a,
                    Err(e) => return (DEFAULT_MODEL_WEIGHT, Err(e)),
                };
                let weight = artifact.metadata.weight();
                (weight, final_price(artifact, &candles, horizon_candles))
            }));
        }

        let outcomes = join_all(tasks)
            .await
            .into_iter()
            .zip(names)
            .map(|(joined, model)| match joined {
                Ok((weight, prediction)) => MemberOutcome {
                    model,
                    weight,
                    prediction,
                },
                Err(e) => MemberOutcome {
                    model,
                    weight: DEFAULT_MODEL_WEIGHT,
                    prediction: Err(ForecastError::Internal(format!("inference task failed: {}", e))),
                },
            })
            .collect();

        self.combine(symbol, outcomes)
    }

    /// Merge member outcomes with this combiner's strategy.
    pub fn combine(&self, symbol: &str, outcomes: Vec<MemberOutcome>) -> Result<EnsembleResult> {
        if outcomes.is_empty() {
            return Err(ForecastError::NoModelsAvailable {
                symbol: symbol.to_string(),
            });
        }
        let attempted = outcomes.len();

        let mut predictions = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            let error = match outcome.prediction {
                Ok(price) if price.is_finite() => {
                    predictions.push(ModelPrediction {
                        model: outcome.model,
                        predicted_price: price,
                        weight: outcome.weight,
                    });
                    continue;
                }
                Ok(price) => format!("non-finite prediction {}", price),
                Err(e) => e.to_string(),
            };
            warn!("{}: {} model excluded from ensemble: {}", symbol, outcome.model, error);
            failures.push(ModelFailure {
                model: outcome.model,
                error,
            });
        }

        if predictions.is_empty() {
            return Err(ForecastError::NoValidPredictions {
                symbol: symbol.to_string(),
                attempted,
            });
        }

        let (predicted_price, confidence, votes) = match self.strategy {
            EnsembleStrategy::WeightedAverage => {
                let (price, confidence) = weighted_average(&predictions);
                (price, confidence, None)
            }
            EnsembleStrategy::Voting => {
                let (price, confidence, votes) = voting(&predictions);
                (price, confidence, Some(votes))
            }
        };
        debug!(
            "{}: ensemble of {} models -> {:.4} (confidence {:.3})",
            symbol,
            predictions.len(),
            predicted_price,
            confidence
        );

        Ok(EnsembleResult {
            strategy: self.strategy,
            predicted_price,
            confidence,
            models_used: predictions.len(),
            votes,
            individual_predictions: predictions,
            failures,
        })
    }
}

fn final_price(artifact: Arc<ModelArtifact>, candles: &[Candle], horizon_candles: usize) -> Result<f64> {
    let model = LoadedModel::from_artifact(artifact)?;
    let mut last = None;
    for point in model.forecast(candles, horizon_candles, 0.95)? {
        last = Some(point?.price);
    }
    last.ok_or_else(|| ForecastError::Internal("empty forecast path".to_string()))
}

/// Weighted mean price and `1 / (1 + std / mean)` confidence.
///
/// Weights are normalised to sum to one; if they are all zero every model
/// counts equally.
pub fn weighted_average(predictions: &[ModelPrediction]) -> (f64, f64) {
    let total: f64 = predictions.iter().map(|p| p.weight.max(0.0)).sum();
    let n = predictions.len() as f64;
    let price = if total > 0.0 {
        predictions
            .iter()
            .map(|p| p.predicted_price * p.weight.max(0.0) / total)
            .sum()
    } else {
        predictions.iter().map(|p| p.predicted_price).sum::<f64>() / n
    };

    let mean = predictions.iter().map(|p| p.predicted_price).sum::<f64>() / n;
    let std = (predictions
        .iter()
        .map(|p| (p.predicted_price - mean).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();
    let confidence = if mean > 0.0 {
        (1.0 / (1.0 + std / mean)).clamp(0.0, 1.0)
    } else {
        0.5
    };
    (price, confidence)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Median price; confidence is the larger side's share of votes, or 1.0 when
/// every model sits on the median.
pub fn voting(predictions: &[ModelPrediction]) -> (f64, f64, Votes) {
    let mut prices: Vec<f64> = predictions.iter().map(|p| p.predicted_price).collect();
    let med = median(&mut prices);
    let above = prices.iter().filter(|p| **p > med).count();
    let below = prices.iter().filter(|p| **p < med).count();

    let confidence = if above == 0 && below == 0 {
        1.0
    } else {
        above.max(below) as f64 / prices.len() as f64
    };
    (med, confidence, Votes { above, below })
}
