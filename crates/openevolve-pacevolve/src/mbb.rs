use openevolve_config::PacEvolveConfig;
use openevolve_core::Program;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

const MIN_GAP: f64 = 1e-6;

/// One restorable best-of-island moment.
#[derive(Clone, Debug)]
pub struct BacktrackRecord {
    pub iteration: u64,
    pub program: Program,
}

/// Per-island momentum state.
#[derive(Clone, Debug, Default)]
struct IslandMomentum {
    /// Recent relative improvements, newest last.
    window: VecDeque<f64>,
    /// EWMA of the window.
    momentum: f64,
    /// Best-of-island moments, newest last.
    history: VecDeque<BacktrackRecord>,
    iterations_since_improvement: u64,
    best_score: Option<f64>,
    initial_score: Option<f64>,
}

/// Momentum-Based Backtracking: tracks per-island improvement momentum
/// and proposes restore points once progress stalls.
pub struct MomentumBacktracker {
    config: PacEvolveConfig,
    islands: HashMap<usize, IslandMomentum>,
    rng: StdRng,
}

impl MomentumBacktracker {
    pub fn new(config: PacEvolveConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            islands: HashMap::new(),
            rng,
        }
    }

    /// Fold a freshly evaluated program into the island's momentum.
    pub fn update(
        &mut self,
        program: &Program,
        iteration: u64,
        island: usize,
        target_score: Option<f64>,
    ) {
        let score = program.fitness(&[]);
        let state = self.islands.entry(island).or_default();
        let first_observation = state.initial_score.is_none();
        if first_observation {
            // The first program is the best-of-island moment so far and
            // seeds the restore history.
            state.initial_score = Some(score);
            state.best_score = Some(score);
            state.history.push_back(BacktrackRecord {
                iteration,
                program: program.clone(),
            });
        }
        let prev = state.best_score.or(state.initial_score).unwrap_or(score);

        let gap = match target_score {
            Some(target) => (target - prev).abs().max(MIN_GAP),
            None => prev.abs().max(MIN_GAP),
        };

        let relative_improvement = if score > prev {
            state.best_score = Some(score);
            state.iterations_since_improvement = 0;
            state.history.push_back(BacktrackRecord {
                iteration,
                program: program.clone(),
            });
            while state.history.len() > self.config.backtrack_depth.max(1) {
                state.history.pop_front();
            }
            (score - prev) / gap
        } else {
            if !first_observation {
                state.iterations_since_improvement += 1;
            }
            0.0
        };

        state.window.push_back(relative_improvement);
        while state.window.len() > self.config.momentum_window_size.max(1) {
            state.window.pop_front();
        }
        state.momentum = self.config.momentum_beta * state.momentum
            + (1.0 - self.config.momentum_beta) * relative_improvement;
    }

    pub fn momentum(&self, island: usize) -> f64 {
        self.islands.get(&island).map(|s| s.momentum).unwrap_or(0.0)
    }

    pub fn iterations_since_improvement(&self, island: usize) -> u64 {
        self.islands
            .get(&island)
            .map(|s| s.iterations_since_improvement)
            .unwrap_or(0)
    }

    /// Loose stagnation signal consumed by the crossover gate.
    pub fn is_stagnating(&self, island: usize) -> bool {
        let Some(state) = self.islands.get(&island) else {
            return false;
        };
        state.momentum.abs() < self.config.stagnation_threshold
            && state.iterations_since_improvement as usize >= self.config.momentum_window_size
    }

    /// True once momentum has flatlined well past the window, or after
    /// a long drought regardless of momentum.
    pub fn should_backtrack(&self, island: usize) -> bool {
        let Some(state) = self.islands.get(&island) else {
            return false;
        };
        if state.history.is_empty() {
            return false;
        }
        let flatlined = state.momentum.abs() < self.config.stagnation_threshold
            && state.iterations_since_improvement as usize
                > 2 * self.config.momentum_window_size;
        flatlined || state.iterations_since_improvement > 50
    }

    /// Pick a restore point by power-law weights over recency
    /// (`1/(rank+1)^backtrackPower`, rank 0 = most recent), then reset
    /// the island's window, momentum, and stagnation counter. History
    /// is retained.
    pub fn backtrack_target(&mut self, island: usize) -> Option<Program> {
        let power = self.config.backtrack_power;
        let state = self.islands.get_mut(&island)?;
        if state.history.is_empty() {
            return None;
        }

        let weights: Vec<f64> = (0..state.history.len())
            .map(|rank| 1.0 / ((rank + 1) as f64).powf(power))
            .collect();
        let total: f64 = weights.iter().sum();
        let mut draw = self.rng.gen::<f64>() * total;
        let mut chosen_rank = weights.len() - 1;
        for (rank, weight) in weights.iter().enumerate() {
            draw -= weight;
            if draw <= 0.0 {
                chosen_rank = rank;
                break;
            }
        }
        // Rank 0 is the most recent record.
        let index = state.history.len() - 1 - chosen_rank;
        let program = state.history.get(index)?.program.clone();

        state.window.clear();
        state.momentum = 0.0;
        state.iterations_since_improvement = 0;
        debug!(island, rank = chosen_rank, "backtrack target selected");
        Some(program)
    }

    pub fn history_len(&self, island: usize) -> usize {
        self.islands
            .get(&island)
            .map(|s| s.history.len())
            .unwrap_or(0)
    }
}
