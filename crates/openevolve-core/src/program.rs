use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Metric name that, when present, governs fitness directly.
pub const COMBINED_SCORE: &str = "combined_score";

/// The unit of evolution: one candidate program.
///
/// Immutable once evaluated; only `metadata` may be annotated after
/// insertion into the database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    /// Stable identifier.
    pub id: String,
    /// Source text.
    pub code: String,
    /// Language tag (e.g. "python", "rust").
    pub language: String,
    /// Identifier of the parent program, if any.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// parent.generation + 1; 0 for the seed.
    #[serde(default)]
    pub generation: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Iteration at which this program was found.
    #[serde(default)]
    pub iteration_found: u64,
    /// Metric name → value, as returned by the evaluator.
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    /// Code length, maintained by the database on insertion.
    #[serde(default)]
    pub complexity: f64,
    /// Mean edit distance to the rolling reference set.
    #[serde(default)]
    pub diversity: f64,
    /// Open-ended annotations (island, action, backtrack/crossover flags).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Serialized evaluation artifacts, if captured.
    #[serde(default)]
    pub artifacts_json: Option<String>,
    /// On-disk artifact directory, if any.
    #[serde(default)]
    pub artifact_dir: Option<String>,
    /// Optional embedding vector.
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
}

impl Program {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            code: code.into(),
            language: language.into(),
            parent_id: None,
            generation: 0,
            created_at: Utc::now(),
            iteration_found: 0,
            metrics: HashMap::new(),
            complexity: 0.0,
            diversity: 0.0,
            metadata: HashMap::new(),
            artifacts_json: None,
            artifact_dir: None,
            embedding: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_iteration(mut self, iteration: u64) -> Self {
        self.iteration_found = iteration;
        self
    }

    pub fn with_metrics(mut self, metrics: HashMap<String, f64>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Scalar fitness. `combined_score` wins when present; otherwise the
    /// mean of finite metrics excluding the given feature dimensions.
    pub fn fitness(&self, feature_dimensions: &[String]) -> f64 {
        program_fitness(&self.metrics, feature_dimensions)
    }

    /// Island index recorded in metadata, when annotated.
    pub fn island(&self) -> Option<usize> {
        self.metadata
            .get("island")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }
}

/// Fitness over a raw metrics map; see [`Program::fitness`].
pub fn program_fitness(metrics: &HashMap<String, f64>, feature_dimensions: &[String]) -> f64 {
    if let Some(score) = metrics.get(COMBINED_SCORE) {
        if score.is_finite() {
            return *score;
        }
    }
    let values: Vec<f64> = metrics
        .iter()
        .filter(|(name, _)| !feature_dimensions.iter().any(|d| d == *name))
        .map(|(_, v)| *v)
        .collect();
    crate::metrics::mean_metric(&values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let p = Program::new("x = 1", "python")
            .with_parent("seed")
            .with_generation(3)
            .with_iteration(7)
            .with_metric("combined_score", 0.5);
        assert_eq!(p.parent_id.as_deref(), Some("seed"));
        assert_eq!(p.generation, 3);
        assert_eq!(p.iteration_found, 7);
        assert_eq!(p.fitness(&[]), 0.5);
    }

    #[test]
    fn combined_score_governs_fitness() {
        let p = Program::new("c", "python")
            .with_metric("combined_score", 0.9)
            .with_metric("other", 0.1);
        assert_eq!(p.fitness(&[]), 0.9);
    }

    #[test]
    fn fitness_falls_back_to_mean() {
        let p = Program::new("c", "python")
            .with_metric("a", 0.2)
            .with_metric("b", 0.4);
        assert!((p.fitness(&[]) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn fitness_excludes_feature_dimensions() {
        let p = Program::new("c", "python")
            .with_metric("a", 0.2)
            .with_metric("complexity", 400.0);
        let dims = vec!["complexity".to_string()];
        assert!((p.fitness(&dims) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn non_finite_combined_score_ignored() {
        let p = Program::new("c", "python")
            .with_metric("combined_score", f64::NAN)
            .with_metric("a", 0.4);
        assert!((p.fitness(&[]) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn island_annotation_round_trip() {
        let p = Program::new("c", "python").annotate("island", serde_json::json!(2));
        assert_eq!(p.island(), Some(2));
    }

    #[test]
    fn program_serde() {
        let p = Program::new("x = 1", "python").with_metric("combined_score", 0.5);
        let json = serde_json::to_string(&p).unwrap();
        let restored: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, p.id);
        assert_eq!(restored.code, "x = 1");
    }
}
