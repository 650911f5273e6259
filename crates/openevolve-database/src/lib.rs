#![deny(unsafe_code)]
//! # openevolve-database
//!
//! The program population store: MAP-Elites feature grids partitioned
//! into islands, a cross-island elite archive, ring migration, and
//! plain-file checkpointing.

pub mod checkpoint;
pub mod database;
pub mod error;
pub mod features;
pub mod island;

pub use checkpoint::CheckpointMetadata;
pub use database::{ProgramDatabase, SelectionStrategy};
pub use error::DatabaseError;
pub use features::FeatureStats;
pub use island::Island;
