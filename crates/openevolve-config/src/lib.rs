#![deny(unsafe_code)]
//! # openevolve-config
//!
//! The YAML configuration tree: top-level run settings plus the `llm`,
//! `prompt`, `database`, `evaluator`, and `pacevolve` sections.
//! `${NAME}` string values resolve from the process environment at
//! load time; a missing variable is a fatal load error.

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use types::{
    Config, DatabaseConfig, EvaluatorConfig, FeatureBins, LlmConfig, ModelConfig, PacEvolveConfig,
    PromptConfig,
};
