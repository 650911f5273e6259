#![deny(unsafe_code)]
//! # openevolve-llm
//!
//! The LLM ensemble: a weighted set of chat-completion clients sampled
//! by inverse-CDF lookup, each wrapping its requests in bounded
//! retries.

pub mod client;
pub mod ensemble;
pub mod error;
pub mod openai;
pub mod types;

pub use client::{ChatClient, FailingChatClient, ScriptedChatClient};
pub use ensemble::LlmEnsemble;
pub use error::LlmError;
pub use openai::{ModelSettings, OpenAiChatClient};
pub use types::{ChatMessage, GenerateOptions};
