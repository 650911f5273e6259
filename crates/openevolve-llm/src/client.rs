use crate::error::LlmError;
use crate::types::{ChatMessage, GenerateOptions};
use async_trait::async_trait;
use std::sync::Mutex;

/// A chat-completion capable model endpoint.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Generate a completion for the given system message and
    /// conversation.
    async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<String, LlmError>;

    /// Model name for logging and sampling statistics.
    fn model_name(&self) -> &str;
}

/// Scripted client for tests: replays a fixed queue of responses,
/// then repeats the last one.
pub struct ScriptedChatClient {
    name: String,
    responses: Mutex<Vec<String>>,
    last: Mutex<Option<String>>,
}

impl ScriptedChatClient {
    pub fn new(name: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(responses),
            last: Mutex::new(None),
        }
    }

    pub fn single(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self::new(name, vec![response.into()])
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn generate(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        _options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| LlmError::Api("scripted client lock poisoned".to_string()))?;
        let next = if queue.is_empty() {
            let last = self
                .last
                .lock()
                .map_err(|_| LlmError::Api("scripted client lock poisoned".to_string()))?;
            last.clone().ok_or(LlmError::EmptyResponse)?
        } else {
            queue.remove(0)
        };
        *self
            .last
            .lock()
            .map_err(|_| LlmError::Api("scripted client lock poisoned".to_string()))? =
            Some(next.clone());
        Ok(next)
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Always-failing client for error-path tests.
pub struct FailingChatClient;

#[async_trait]
impl ChatClient for FailingChatClient {
    async fn generate(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        _options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        Err(LlmError::RetryExhausted {
            attempts: 1,
            cause: Box::new(LlmError::Api("simulated failure".to_string())),
        })
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}
