#![deny(unsafe_code)]
//! # openevolve-prompt
//!
//! Prompt assembly: a template manager layering user `.txt` templates
//! over built-in defaults, and a sampler that renders the parent
//! program, evolution history, idea memory, and artifacts into
//! `{ system, user }` messages.

pub mod defaults;
pub mod error;
pub mod sampler;
pub mod templates;

pub use error::PromptError;
pub use sampler::{Prompt, PromptContext, PromptSampler};
pub use templates::TemplateManager;
