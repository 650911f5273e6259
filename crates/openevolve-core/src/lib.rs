#![deny(unsafe_code)]
//! # openevolve-core
//!
//! Program model and text utilities shared by every engine component:
//! the unit of evolution, fitness derivation, edit distance, diff
//! parsing/application, and code-block extraction.

pub mod diff;
pub mod distance;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod program;

pub use diff::{apply_diff, DiffBlock, DiffParser};
pub use distance::levenshtein;
pub use error::CoreError;
pub use extract::extract_code_block;
pub use metrics::mean_metric;
pub use program::{program_fitness, Program, COMBINED_SCORE};
