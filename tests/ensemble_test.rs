use foresight::services::ensemble::{EnsembleCombiner, MemberOutcome};
use foresight::{EnsembleStrategy, ForecastError, Stage};

fn member(model: &str, price: Option<f64>, weight: f64) -> MemberOutcome {
    MemberOutcome {
        model: model.to_string(),
        weight,
        prediction: price.ok_or_else(|| ForecastError::data("BTCUSDT", Stage::Inference, "boom")),
    }
}

#[test]
fn test_equal_weights_average() {
    let result = EnsembleCombiner::new(EnsembleStrategy::WeightedAverage)
        .combine(
            "BTCUSDT",
            vec![member("linear", Some(100.0), 0.5), member("mlp", Some(102.0), 0.5)],
        )
        .unwrap();
    assert_eq!(result.predicted_price, 101.0);
    assert_eq!(result.models_used, 2);
}

#[test]
fn test_failing_member_is_recorded_not_fatal() {
    let result = EnsembleCombiner::new(EnsembleStrategy::Voting)
        .combine(
            "BTCUSDT",
            vec![member("linear", None, 0.5), member("mlp", Some(99.0), 0.7)],
        )
        .unwrap();
    assert_eq!(result.models_used, 1);
    assert_eq!(result.predicted_price, 99.0);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].error.contains("boom"));
}

#[test]
fn test_every_member_failing() {
    let err = EnsembleCombiner::new(EnsembleStrategy::WeightedAverage)
        .combine("BTCUSDT", vec![member("linear", None, 0.5)])
        .unwrap_err();
    assert!(matches!(err, ForecastError::NoValidPredictions { attempted: 1, .. }));
}

#[test]
fn test_result_serializes_camel_case() {
    let result = EnsembleCombiner::new(EnsembleStrategy::Voting)
        .combine(
            "BTCUSDT",
            vec![member("a", Some(1.0), 0.5), member("b", Some(2.0), 0.5), member("c", Some(3.0), 0.5)],
        )
        .unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["strategy"], "voting");
    assert_eq!(json["predictedPrice"], 2.0);
    assert_eq!(json["votes"]["above"], 1);
    assert_eq!(json["individualPredictions"].as_array().unwrap().len(), 3);
    assert!(json.get("failures").is_none());
}
