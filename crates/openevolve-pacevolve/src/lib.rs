#![deny(unsafe_code)]
//! # openevolve-pacevolve
//!
//! The three PACEvolve state machines, consulted by the controller in
//! a fixed order each iteration: Hierarchical Context Management
//! (idea-cluster memory), Momentum-Based Backtracking (per-island
//! stagnation detection), and Self-Adaptive Collaborative Evolution
//! (explore/exploit/backtrack policy plus cross-island crossover).
//!
//! Each machine is self-contained: no cross-references, no globals.

pub mod ce;
pub mod hcm;
pub mod mbb;

pub use ce::{Action, CollaborativeEvolution, SamplingPolicy};
pub use hcm::{HierarchicalContextManager, IdeaCluster, IdeaHypothesis};
pub use mbb::{BacktrackRecord, MomentumBacktracker};
