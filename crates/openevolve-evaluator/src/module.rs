use crate::error::EvaluationError;
use crate::types::StageOutcome;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// The user evaluation contract: score a program written to
/// `program_path`. Implementations with `stages() > 0` additionally
/// expose the cascade stages.
#[async_trait]
pub trait EvaluationModule: Send + Sync {
    async fn evaluate(&self, program_path: &Path) -> Result<StageOutcome, EvaluationError>;

    /// Number of cascade stages this module provides; 0 disables
    /// cascade mode.
    fn stages(&self) -> usize {
        0
    }

    /// Run one cascade stage (1-based). Defaults to the direct
    /// evaluation.
    async fn evaluate_stage(
        &self,
        _stage: usize,
        program_path: &Path,
    ) -> Result<StageOutcome, EvaluationError> {
        self.evaluate(program_path).await
    }
}

/// Evaluation module backed by a user executable. The program path is
/// passed as the first argument; cascade stages add `--stage N`. The
/// executable prints a JSON metrics object (bare, or wrapped with
/// `artifacts`) on stdout.
#[derive(Debug)]
pub struct CommandEvaluator {
    command: PathBuf,
    stages: usize,
}

impl CommandEvaluator {
    /// Fails when the executable does not exist, surfacing the
    /// structural fault before any evolution starts.
    pub fn new(command: impl Into<PathBuf>) -> Result<Self, EvaluationError> {
        let command = command.into();
        if !command.exists() {
            return Err(EvaluationError::ModuleLoad(format!(
                "evaluator executable not found: {}",
                command.display()
            )));
        }
        Ok(Self { command, stages: 0 })
    }

    /// Declare how many cascade stages the executable supports.
    pub fn with_stages(mut self, stages: usize) -> Self {
        self.stages = stages;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<StageOutcome, EvaluationError> {
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .await
            .map_err(EvaluationError::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EvaluationError::EvaluationFailed(format!(
                "evaluator exited with {}: {}",
                output.status, stderr
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let value: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| EvaluationError::OutputParse(e.to_string()))?;
        StageOutcome::from_json(value)
    }
}

#[async_trait]
impl EvaluationModule for CommandEvaluator {
    async fn evaluate(&self, program_path: &Path) -> Result<StageOutcome, EvaluationError> {
        let path = program_path.to_string_lossy().to_string();
        self.run(&[&path]).await
    }

    fn stages(&self) -> usize {
        self.stages
    }

    async fn evaluate_stage(
        &self,
        stage: usize,
        program_path: &Path,
    ) -> Result<StageOutcome, EvaluationError> {
        let path = program_path.to_string_lossy().to_string();
        let stage = stage.to_string();
        self.run(&[&path, "--stage", &stage]).await
    }
}

/// In-process module for tests and demos: maps exact program text to
/// canned metrics, with a default score for unknown programs.
pub struct SimulatedEvaluator {
    outcomes: HashMap<String, HashMap<String, f64>>,
    default_score: f64,
    fail_always: bool,
}

impl SimulatedEvaluator {
    pub fn new() -> Self {
        Self {
            outcomes: HashMap::new(),
            default_score: 0.0,
            fail_always: false,
        }
    }

    pub fn with_outcome(mut self, code: impl Into<String>, score: f64) -> Self {
        self.outcomes.insert(
            code.into(),
            HashMap::from([("combined_score".to_string(), score)]),
        );
        self
    }

    pub fn with_default_score(mut self, score: f64) -> Self {
        self.default_score = score;
        self
    }

    /// Always raises, for failure-path tests.
    pub fn failing() -> Self {
        Self {
            outcomes: HashMap::new(),
            default_score: 0.0,
            fail_always: true,
        }
    }
}

impl Default for SimulatedEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvaluationModule for SimulatedEvaluator {
    async fn evaluate(&self, program_path: &Path) -> Result<StageOutcome, EvaluationError> {
        if self.fail_always {
            return Err(EvaluationError::EvaluationFailed(
                "simulated evaluation failure".to_string(),
            ));
        }
        let code = tokio::fs::read_to_string(program_path)
            .await
            .map_err(EvaluationError::Io)?;
        let metrics = self
            .outcomes
            .get(code.trim_end())
            .cloned()
            .unwrap_or_else(|| {
                HashMap::from([("combined_score".to_string(), self.default_score)])
            });
        Ok(StageOutcome::from_metrics(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_evaluator_requires_existing_file() {
        let err = CommandEvaluator::new("/nonexistent/evaluator").unwrap_err();
        assert!(matches!(err, EvaluationError::ModuleLoad(_)));
    }

    #[tokio::test]
    async fn simulated_evaluator_maps_code_to_score() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.py");
        tokio::fs::write(&path, "x = 2\n").await.unwrap();

        let module = SimulatedEvaluator::new()
            .with_outcome("x = 2", 0.8)
            .with_default_score(0.1);
        let outcome = module.evaluate(&path).await.unwrap();
        assert_eq!(outcome.metrics["combined_score"], 0.8);
    }

    #[tokio::test]
    async fn simulated_evaluator_default_for_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.py");
        tokio::fs::write(&path, "unknown\n").await.unwrap();

        let module = SimulatedEvaluator::new().with_default_score(0.3);
        let outcome = module.evaluate(&path).await.unwrap();
        assert_eq!(outcome.metrics["combined_score"], 0.3);
    }

    #[tokio::test]
    async fn failing_module_errors() {
        let module = SimulatedEvaluator::failing();
        let result = module.evaluate(Path::new("/tmp/whatever")).await;
        assert!(result.is_err());
    }
}
