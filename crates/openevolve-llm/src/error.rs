/// Errors from the LLM ensemble and its clients.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("ensemble has no models")]
    EmptyEnsemble,
    #[error("ensemble model weights sum to zero")]
    ZeroWeight,
    #[error("model returned an empty reply")]
    EmptyResponse,
    #[error("API error: {0}")]
    Api(String),
    #[error("request transport error: {0}")]
    Transport(String),
    #[error("retries exhausted after {attempts} attempts: {cause}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        cause: Box<LlmError>,
    },
}
