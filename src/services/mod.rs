pub mod cache;
pub mod ensemble;
pub mod evaluator;
pub mod features;
pub mod forecast;
pub mod pipeline;
pub mod predictor;
pub mod registry;
pub mod scaler;
pub mod trainer;
pub mod windows;

pub use cache::Cache;
pub use ensemble::{EnsembleCombiner, MemberOutcome};
pub use evaluator::Evaluator;
pub use features::{FeatureEngine, FeatureFrame, FeatureSet};
pub use forecast::{ForecastPath, LoadedModel};
pub use pipeline::{
    EnsembleForecast, Forecast, ForecastService, ModelStats, TrainOutcome,
};
pub use predictor::{build_predictor, Predictor, PredictorKind, PredictorSpec, PredictorState};
pub use registry::{ArtifactStore, ModelArtifact, ModelSummary};
pub use scaler::{Scaler, ScalingMethod};
pub use trainer::{TrainingConfig, TrainingController, TrainingHistory};
pub use windows::{WindowBuilder, WindowSet};
