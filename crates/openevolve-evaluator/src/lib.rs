#![deny(unsafe_code)]
//! # openevolve-evaluator
//!
//! The evaluation pipeline: a pluggable user evaluation module run in
//! a fresh temp directory per candidate, with hard timeouts, bounded
//! retries, optional cascade stages, artifact capture, and optional
//! LLM feedback metrics.

pub mod error;
pub mod evaluator;
pub mod module;
pub mod types;

pub use error::EvaluationError;
pub use evaluator::Evaluator;
pub use module::{CommandEvaluator, EvaluationModule, SimulatedEvaluator};
pub use types::StageOutcome;
