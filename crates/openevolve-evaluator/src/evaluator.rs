use crate::error::EvaluationError;
use crate::module::EvaluationModule;
use crate::types::StageOutcome;
use openevolve_config::EvaluatorConfig;
use openevolve_core::{mean_metric, COMBINED_SCORE};
use openevolve_llm::{ChatMessage, GenerateOptions, LlmEnsemble};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// LLM-feedback settings: the evaluator-model ensemble plus the system
/// message it is driven with.
struct LlmFeedback {
    ensemble: Arc<LlmEnsemble>,
    system_message: String,
}

/// Runs the user evaluation module against candidate programs.
///
/// Every invocation writes the candidate to a fresh unique temp
/// directory, races the module against the configured timeout, and
/// records failure artifacts into a pending map keyed by program id.
pub struct Evaluator {
    module: Arc<dyn EvaluationModule>,
    config: EvaluatorConfig,
    file_suffix: String,
    feedback: Option<LlmFeedback>,
    pending_artifacts: Mutex<HashMap<String, HashMap<String, String>>>,
    artifacts_enabled: bool,
}

impl Evaluator {
    pub fn new(
        module: Arc<dyn EvaluationModule>,
        config: EvaluatorConfig,
        file_suffix: impl Into<String>,
    ) -> Self {
        let env_disabled = std::env::var("ENABLE_ARTIFACTS")
            .map(|v| v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        let artifacts_enabled = config.enable_artifacts && !env_disabled;
        if config.cascade_evaluation && module.stages() == 0 {
            warn!("cascade evaluation configured but module has no stages; using direct evaluation");
        }
        Self {
            module,
            config,
            file_suffix: file_suffix.into(),
            feedback: None,
            pending_artifacts: Mutex::new(HashMap::new()),
            artifacts_enabled,
        }
    }

    pub fn with_llm_feedback(
        mut self,
        ensemble: Arc<LlmEnsemble>,
        system_message: impl Into<String>,
    ) -> Self {
        self.feedback = Some(LlmFeedback {
            ensemble,
            system_message: system_message.into(),
        });
        self
    }

    /// Score a candidate. Never fails: exhausted retries and cascade
    /// stage-1 failures degrade to `{ error: 0.0 }`.
    pub async fn evaluate_program(
        &self,
        code: &str,
        program_id: &str,
    ) -> HashMap<String, f64> {
        let mut metrics = if self.config.cascade_evaluation && self.module.stages() > 0 {
            self.evaluate_cascade(code, program_id).await
        } else {
            self.evaluate_direct(code, program_id).await
        };

        if self.config.use_llm_feedback && !metrics.contains_key("error") {
            if let Some(feedback) = &self.feedback {
                let llm_metrics = self.collect_llm_feedback(feedback, code).await;
                metrics.extend(llm_metrics);
            }
        }
        metrics
    }

    async fn evaluate_direct(&self, code: &str, program_id: &str) -> HashMap<String, f64> {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.run_module(code, None).await {
                Ok(outcome) => {
                    self.record_artifacts(program_id, outcome.artifacts.clone());
                    return outcome.metrics;
                }
                Err(e) => {
                    warn!(program = program_id, attempt, error = %e, "evaluation attempt failed");
                    self.record_failure(program_id, attempt, "evaluation", &e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
        HashMap::from([("error".to_string(), 0.0)])
    }

    async fn evaluate_cascade(&self, code: &str, program_id: &str) -> HashMap<String, f64> {
        let mut merged = match self.run_module(code, Some(1)).await {
            Ok(outcome) => {
                self.record_artifacts(program_id, outcome.artifacts.clone());
                outcome
            }
            Err(e) => {
                warn!(program = program_id, error = %e, "cascade stage 1 failed");
                self.record_stage_failure(program_id, 1, &e);
                return HashMap::from([("error".to_string(), 0.0)]);
            }
        };

        let thresholds = &self.config.cascade_thresholds;
        for stage in 2..=self.module.stages().min(3) {
            let threshold = thresholds.get(stage - 2).copied().unwrap_or(f64::INFINITY);
            if !cascade_passes(&merged.metrics, threshold) {
                debug!(program = program_id, stage, threshold, "cascade threshold not met");
                break;
            }
            match self.run_module(code, Some(stage)).await {
                Ok(outcome) => {
                    self.record_artifacts(program_id, outcome.artifacts.clone());
                    merged.merge(outcome);
                }
                Err(e) => {
                    warn!(program = program_id, stage, error = %e, "cascade stage failed");
                    self.record_stage_failure(program_id, stage, &e);
                    break;
                }
            }
        }
        merged.metrics
    }

    /// Write the candidate into a fresh temp directory and run the
    /// module (or one cascade stage) under the configured timeout. The
    /// directory is removed on every exit path.
    async fn run_module(
        &self,
        code: &str,
        stage: Option<usize>,
    ) -> Result<StageOutcome, EvaluationError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(format!("program{}", self.file_suffix));
        tokio::fs::write(&path, code).await?;

        let deadline = Duration::from_secs(self.config.timeout);
        let result = match stage {
            Some(stage) => timeout(deadline, self.run_stage(stage, &path)).await,
            None => timeout(deadline, self.module.evaluate(&path)).await,
        };
        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(EvaluationError::Timeout(self.config.timeout)),
        }
    }

    async fn run_stage(
        &self,
        stage: usize,
        path: &Path,
    ) -> Result<StageOutcome, EvaluationError> {
        self.module.evaluate_stage(stage, path).await
    }

    async fn collect_llm_feedback(
        &self,
        feedback: &LlmFeedback,
        code: &str,
    ) -> HashMap<String, f64> {
        let user = format!(
            "Evaluate the following program and respond with a single JSON object \
             of metric names to values in [0, 1]:\n```\n{}\n```",
            code
        );
        let responses = feedback
            .ensemble
            .generate_all(
                &feedback.system_message,
                &[ChatMessage::user(user)],
                &GenerateOptions::default(),
            )
            .await;

        let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
        for response in &responses {
            for (name, value) in parse_json_metrics(response) {
                let entry = sums.entry(name).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        sums.into_iter()
            .map(|(name, (sum, count))| {
                let average = sum / count as f64;
                (
                    format!("llm_{}", name),
                    average * self.config.llm_feedback_weight,
                )
            })
            .collect()
    }

    fn record_artifacts(&self, program_id: &str, artifacts: HashMap<String, String>) {
        if !self.artifacts_enabled || artifacts.is_empty() {
            return;
        }
        if let Ok(mut pending) = self.pending_artifacts.lock() {
            pending
                .entry(program_id.to_string())
                .or_default()
                .extend(artifacts);
        }
    }

    fn record_failure(
        &self,
        program_id: &str,
        attempt: u32,
        stage: &str,
        error: &EvaluationError,
    ) {
        self.record_artifacts(
            program_id,
            HashMap::from([
                ("stderr".to_string(), error.to_string()),
                ("failure_stage".to_string(), stage.to_string()),
                ("attempt".to_string(), attempt.to_string()),
            ]),
        );
    }

    fn record_stage_failure(&self, program_id: &str, stage: usize, error: &EvaluationError) {
        self.record_artifacts(
            program_id,
            HashMap::from([
                (format!("stage{}_stderr", stage), error.to_string()),
                ("failure_stage".to_string(), format!("stage{}", stage)),
            ]),
        );
    }

    /// Drain captured artifacts for a program (consume-on-get).
    pub fn take_artifacts(&self, program_id: &str) -> Option<HashMap<String, String>> {
        self.pending_artifacts
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(program_id))
    }
}

/// Pull numeric metrics out of a feedback reply. Models often wrap the
/// JSON in prose or a fence; the outermost `{...}` span is parsed.
fn parse_json_metrics(response: &str) -> HashMap<String, f64> {
    let Some(start) = response.find('{') else {
        return HashMap::new();
    };
    let Some(end) = response.rfind('}') else {
        return HashMap::new();
    };
    if end < start {
        return HashMap::new();
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&response[start..=end]) else {
        return HashMap::new();
    };
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default()
}

/// A stage passes when `combined_score >= threshold`. Without a
/// combined score, the mean of non-error numeric metrics decides.
fn cascade_passes(metrics: &HashMap<String, f64>, threshold: f64) -> bool {
    if let Some(score) = metrics.get(COMBINED_SCORE) {
        return *score >= threshold;
    }
    let values: Vec<f64> = metrics
        .iter()
        .filter(|(name, _)| *name != "error")
        .map(|(_, v)| *v)
        .collect();
    mean_metric(&values) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::SimulatedEvaluator;
    use async_trait::async_trait;

    fn config() -> EvaluatorConfig {
        EvaluatorConfig {
            timeout: 5,
            max_retries: 2,
            ..EvaluatorConfig::default()
        }
    }

    #[tokio::test]
    async fn direct_evaluation_returns_metrics() {
        let module = Arc::new(SimulatedEvaluator::new().with_outcome("x = 2", 0.8));
        let evaluator = Evaluator::new(module, config(), ".py");
        let metrics = evaluator.evaluate_program("x = 2", "p1").await;
        assert_eq!(metrics["combined_score"], 0.8);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_error_zero() {
        let module = Arc::new(SimulatedEvaluator::failing());
        let evaluator = Evaluator::new(module, config(), ".py");
        let metrics = evaluator.evaluate_program("x", "p1").await;
        assert_eq!(metrics["error"], 0.0);
        let artifacts = evaluator.take_artifacts("p1").unwrap();
        assert!(artifacts["stderr"].contains("simulated"));
        assert_eq!(artifacts["failure_stage"], "evaluation");
    }

    #[tokio::test]
    async fn artifacts_are_consume_on_get() {
        let module = Arc::new(SimulatedEvaluator::failing());
        let evaluator = Evaluator::new(module, config(), ".py");
        evaluator.evaluate_program("x", "p1").await;
        assert!(evaluator.take_artifacts("p1").is_some());
        assert!(evaluator.take_artifacts("p1").is_none());
    }

    struct StagedModule {
        stage2_fails: bool,
    }

    #[async_trait]
    impl EvaluationModule for StagedModule {
        async fn evaluate(
            &self,
            _program_path: &Path,
        ) -> Result<StageOutcome, EvaluationError> {
            Ok(StageOutcome::from_metrics(HashMap::from([(
                "combined_score".to_string(),
                0.9,
            )])))
        }

        fn stages(&self) -> usize {
            3
        }

        async fn evaluate_stage(
            &self,
            stage: usize,
            _program_path: &Path,
        ) -> Result<StageOutcome, EvaluationError> {
            match stage {
                1 => Ok(StageOutcome::from_metrics(HashMap::from([(
                    "combined_score".to_string(),
                    0.6,
                )]))),
                2 if self.stage2_fails => Err(EvaluationError::EvaluationFailed(
                    "stage 2 exploded".to_string(),
                )),
                2 => Ok(StageOutcome::from_metrics(HashMap::from([(
                    "stage2_metric".to_string(),
                    0.8,
                )]))),
                _ => Ok(StageOutcome::from_metrics(HashMap::from([(
                    "stage3_metric".to_string(),
                    1.0,
                )]))),
            }
        }
    }

    #[tokio::test]
    async fn cascade_merges_passing_stages() {
        let module = Arc::new(StagedModule {
            stage2_fails: false,
        });
        let evaluator = Evaluator::new(
            module,
            EvaluatorConfig {
                cascade_evaluation: true,
                cascade_thresholds: vec![0.5, 0.7],
                ..config()
            },
            ".py",
        );
        let metrics = evaluator.evaluate_program("x", "p1").await;
        assert_eq!(metrics["combined_score"], 0.6);
        assert_eq!(metrics["stage2_metric"], 0.8);
        // combined_score 0.6 < 0.7 threshold: stage 3 never runs.
        assert!(!metrics.contains_key("stage3_metric"));
    }

    #[tokio::test]
    async fn cascade_short_circuits_on_stage_failure() {
        let module = Arc::new(StagedModule { stage2_fails: true });
        let evaluator = Evaluator::new(
            module,
            EvaluatorConfig {
                cascade_evaluation: true,
                cascade_thresholds: vec![0.5, 0.7],
                ..config()
            },
            ".py",
        );
        let metrics = evaluator.evaluate_program("x", "p1").await;
        // Last successful merge survives.
        assert_eq!(metrics["combined_score"], 0.6);
        let artifacts = evaluator.take_artifacts("p1").unwrap();
        assert!(artifacts["stage2_stderr"].contains("exploded"));
        assert_eq!(artifacts["failure_stage"], "stage2");
    }

    #[tokio::test]
    async fn cascade_below_first_threshold_stops_after_stage1() {
        let module = Arc::new(StagedModule {
            stage2_fails: false,
        });
        let evaluator = Evaluator::new(
            module,
            EvaluatorConfig {
                cascade_evaluation: true,
                cascade_thresholds: vec![0.95],
                ..config()
            },
            ".py",
        );
        let metrics = evaluator.evaluate_program("x", "p1").await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics["combined_score"], 0.6);
    }

    struct SlowModule;

    #[async_trait]
    impl EvaluationModule for SlowModule {
        async fn evaluate(
            &self,
            _program_path: &Path,
        ) -> Result<StageOutcome, EvaluationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StageOutcome::default())
        }
    }

    #[tokio::test]
    async fn timeout_degrades_to_error_zero() {
        let evaluator = Evaluator::new(
            Arc::new(SlowModule),
            EvaluatorConfig {
                timeout: 1,
                max_retries: 1,
                ..config()
            },
            ".py",
        );
        let metrics = evaluator.evaluate_program("x", "p1").await;
        assert_eq!(metrics["error"], 0.0);
        let artifacts = evaluator.take_artifacts("p1").unwrap();
        assert!(artifacts["stderr"].contains("timed out"));
    }

    #[test]
    fn parse_json_metrics_handles_fenced_reply() {
        let reply = "Here are my scores:\n```json\n{\"clarity\": 0.7, \"note\": \"good\"}\n```";
        let metrics = parse_json_metrics(reply);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics["clarity"], 0.7);
    }

    #[test]
    fn parse_json_metrics_empty_for_prose() {
        assert!(parse_json_metrics("no json here").is_empty());
    }

    #[test]
    fn cascade_passes_uses_combined_score() {
        let metrics = HashMap::from([("combined_score".to_string(), 0.6)]);
        assert!(cascade_passes(&metrics, 0.5));
        assert!(!cascade_passes(&metrics, 0.7));
    }

    #[test]
    fn cascade_passes_mean_excludes_error() {
        let metrics = HashMap::from([
            ("a".to_string(), 0.8),
            ("b".to_string(), 0.6),
            ("error".to_string(), 0.0),
        ]);
        assert!(cascade_passes(&metrics, 0.7));
    }

    #[tokio::test]
    async fn llm_feedback_merges_scaled_metrics() {
        use openevolve_llm::ScriptedChatClient;
        let client: Arc<dyn openevolve_llm::ChatClient> = Arc::new(ScriptedChatClient::single(
            "judge",
            r#"{"readability": 0.8}"#,
        ));
        let ensemble =
            Arc::new(LlmEnsemble::from_clients(vec![client], vec![1.0], Some(1)).unwrap());
        let module = Arc::new(SimulatedEvaluator::new().with_default_score(0.5));
        let evaluator = Evaluator::new(
            module,
            EvaluatorConfig {
                use_llm_feedback: true,
                llm_feedback_weight: 0.5,
                ..config()
            },
            ".py",
        )
        .with_llm_feedback(ensemble, "judge the code");
        let metrics = evaluator.evaluate_program("x", "p1").await;
        assert_eq!(metrics["combined_score"], 0.5);
        assert!((metrics["llm_readability"] - 0.4).abs() < 1e-9);
    }
}
