/// Errors from the evaluation pipeline. Module-load failures are fatal
/// at engine construction; everything else is recovered per candidate.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("failed to load evaluation module: {0}")]
    ModuleLoad(String),
    #[error("evaluation I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("evaluation timed out after {0}s")]
    Timeout(u64),
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),
    #[error("could not parse evaluator output: {0}")]
    OutputParse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        assert!(format!("{}", EvaluationError::Timeout(30)).contains("30s"));
    }
}
