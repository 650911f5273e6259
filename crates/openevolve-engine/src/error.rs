use openevolve_config::ConfigError;
use openevolve_core::CoreError;
use openevolve_database::DatabaseError;
use openevolve_evaluator::EvaluationError;
use openevolve_llm::LlmError;
use openevolve_prompt::PromptError;
use std::path::PathBuf;

/// Errors from the evolution engine. Per-iteration faults are caught
/// by the run loop; the rest propagate to the hosting shell.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("initial program not found: {0}")]
    SeedMissing(PathBuf),
    #[error("run {0} not found")]
    RunNotFound(String),
    #[error("run {0} is not running")]
    RunNotRunning(String),
    #[error("internal lock poisoned")]
    LockPoisoned,
    #[error("database contains no programs")]
    NoPrograms,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_not_found_display() {
        assert!(format!("{}", EngineError::RunNotFound("abc".into())).contains("abc"));
    }
}
