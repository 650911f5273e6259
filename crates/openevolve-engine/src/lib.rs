#![deny(unsafe_code)]
//! # openevolve-engine
//!
//! The evolution controller and its service surface: one cooperative
//! iteration loop wiring the program database, LLM ensemble, prompt
//! sampler, evaluator, and the PACEvolve scheduler, plus the control
//! API presented to the hosting shell.

pub mod controller;
pub mod error;
pub mod events;
pub mod logger;
pub mod service;

pub use controller::{EvolutionController, EvolutionStatus};
pub use error::EngineError;
pub use events::{EventBus, EvolutionEvent};
pub use logger::{LogRecord, RunLogger};
pub use service::{EvolutionData, EvolutionService, StartEvolutionRequest};

/// Install a `tracing` subscriber honoring the configured log level.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
