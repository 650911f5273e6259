use crate::error::EvaluationError;
use serde_json::Value;
use std::collections::HashMap;

/// Normalized result of one evaluation stage: a flat metrics map plus
/// optional textual artifacts.
#[derive(Clone, Debug, Default)]
pub struct StageOutcome {
    pub metrics: HashMap<String, f64>,
    pub artifacts: HashMap<String, String>,
}

impl StageOutcome {
    pub fn from_metrics(metrics: HashMap<String, f64>) -> Self {
        Self {
            metrics,
            artifacts: HashMap::new(),
        }
    }

    /// Accepts either `{ metrics: {...}, artifacts: {...} }` or a bare
    /// metrics object.
    pub fn from_json(value: Value) -> Result<Self, EvaluationError> {
        let Value::Object(object) = value else {
            return Err(EvaluationError::OutputParse(
                "evaluator output is not a JSON object".to_string(),
            ));
        };

        if let Some(metrics_value) = object.get("metrics") {
            let metrics = numeric_entries(metrics_value).ok_or_else(|| {
                EvaluationError::OutputParse("\"metrics\" is not an object".to_string())
            })?;
            let artifacts = object
                .get("artifacts")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .map(|(k, v)| (k.clone(), stringify(v)))
                        .collect()
                })
                .unwrap_or_default();
            return Ok(Self { metrics, artifacts });
        }

        let metrics = numeric_entries(&Value::Object(object)).unwrap_or_default();
        Ok(Self {
            metrics,
            artifacts: HashMap::new(),
        })
    }

    /// Merge a later stage into this one; later values win per key.
    pub fn merge(&mut self, other: StageOutcome) {
        self.metrics.extend(other.metrics);
        self.artifacts.extend(other.artifacts);
    }
}

fn numeric_entries(value: &Value) -> Option<HashMap<String, f64>> {
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
            .collect(),
    )
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_metrics_object() {
        let outcome = StageOutcome::from_json(json!({ "combined_score": 0.5, "speed": 1.5 }))
            .unwrap();
        assert_eq!(outcome.metrics["combined_score"], 0.5);
        assert!(outcome.artifacts.is_empty());
    }

    #[test]
    fn wrapped_metrics_and_artifacts() {
        let outcome = StageOutcome::from_json(json!({
            "metrics": { "combined_score": 0.8 },
            "artifacts": { "stdout": "ok", "exit": 0 }
        }))
        .unwrap();
        assert_eq!(outcome.metrics["combined_score"], 0.8);
        assert_eq!(outcome.artifacts["stdout"], "ok");
        assert_eq!(outcome.artifacts["exit"], "0");
    }

    #[test]
    fn non_numeric_metrics_dropped() {
        let outcome =
            StageOutcome::from_json(json!({ "combined_score": 0.5, "note": "hi" })).unwrap();
        assert_eq!(outcome.metrics.len(), 1);
    }

    #[test]
    fn non_object_rejected() {
        assert!(StageOutcome::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn merge_later_stage_wins() {
        let mut first = StageOutcome::from_json(json!({ "a": 1.0, "b": 1.0 })).unwrap();
        let second = StageOutcome::from_json(json!({ "b": 2.0, "c": 3.0 })).unwrap();
        first.merge(second);
        assert_eq!(first.metrics["a"], 1.0);
        assert_eq!(first.metrics["b"], 2.0);
        assert_eq!(first.metrics["c"], 3.0);
    }
}
