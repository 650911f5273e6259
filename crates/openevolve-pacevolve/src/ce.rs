use openevolve_config::PacEvolveConfig;
use openevolve_core::Program;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};

const PROB_FLOOR: f64 = 0.05;
const MIN_GAP: f64 = 1e-6;
const LAG_MARGIN: f64 = 0.05;

/// Controller action for one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Explore,
    Exploit,
    Backtrack,
}

/// Probability distribution over actions, floored at 0.05 per action
/// and always summing to 1.
#[derive(Clone, Copy, Debug)]
pub struct SamplingPolicy {
    pub explore: f64,
    pub exploit: f64,
    pub backtrack: f64,
}

impl SamplingPolicy {
    pub fn new(explore: f64, exploit: f64, backtrack: f64) -> Self {
        let mut policy = Self {
            explore,
            exploit,
            backtrack,
        };
        policy.clamp_and_normalize();
        policy
    }

    /// Threshold a uniform draw against the cumulative sums.
    pub fn sample(&self, rng: &mut StdRng) -> Action {
        let draw: f64 = rng.gen();
        if draw < self.explore {
            Action::Explore
        } else if draw < self.explore + self.exploit {
            Action::Exploit
        } else {
            Action::Backtrack
        }
    }

    /// Shift probability mass by the momentum band. `lagging` softens
    /// exploration in favor of backtracking when a peer island is ahead.
    pub fn update(&mut self, momentum: f64, lagging: bool, rate: f64) {
        if momentum > 0.01 {
            self.exploit += rate;
            self.explore -= rate / 2.0;
            self.backtrack -= rate / 2.0;
        } else if momentum.abs() < 0.001 {
            self.explore += rate * if lagging { 0.6 } else { 1.0 };
            self.exploit -= 0.7 * rate;
            self.backtrack += rate * if lagging { 0.7 } else { 0.3 };
        } else if momentum < -0.01 {
            self.backtrack += rate;
            self.explore -= 0.3 * rate;
            self.exploit -= 0.7 * rate;
        }
        self.clamp_and_normalize();
    }

    fn clamp_and_normalize(&mut self) {
        self.explore = self.explore.max(PROB_FLOOR);
        self.exploit = self.exploit.max(PROB_FLOOR);
        self.backtrack = self.backtrack.max(PROB_FLOOR);
        let total = self.explore + self.exploit + self.backtrack;
        self.explore /= total;
        self.exploit /= total;
        self.backtrack /= total;
    }

    pub fn sum(&self) -> f64 {
        self.explore + self.exploit + self.backtrack
    }
}

#[derive(Clone, Copy, Debug)]
struct IslandProgress {
    initial: f64,
    best: f64,
}

/// Self-Adaptive Collaborative Evolution: the explore/exploit/backtrack
/// policy plus cross-island crossover scheduling.
pub struct CollaborativeEvolution {
    config: PacEvolveConfig,
    policy: SamplingPolicy,
    islands: HashMap<usize, IslandProgress>,
    last_crossover_iteration: u64,
    rng: StdRng,
}

impl CollaborativeEvolution {
    pub fn new(config: PacEvolveConfig, seed: Option<u64>) -> Self {
        let policy = SamplingPolicy::new(
            config.initial_explore_prob,
            config.initial_exploit_prob,
            config.initial_backtrack_prob,
        );
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            policy,
            islands: HashMap::new(),
            last_crossover_iteration: 0,
            rng,
        }
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    pub fn sample_action(&mut self) -> Action {
        self.policy.sample(&mut self.rng)
    }

    /// Record an island-best observation; the first one fixes the
    /// island's initial score.
    pub fn observe_island(&mut self, island: usize, score: f64) {
        let entry = self.islands.entry(island).or_insert(IslandProgress {
            initial: score,
            best: score,
        });
        if score > entry.best {
            entry.best = score;
        }
    }

    /// `(best - initial) / max(|target - initial|, 1e-6)`, or against
    /// `max(|initial|, 1e-6)` when no target is set.
    pub fn absolute_progress(&self, island: usize, target: Option<f64>) -> f64 {
        let Some(progress) = self.islands.get(&island) else {
            return 0.0;
        };
        let gap = match target {
            Some(t) => (t - progress.initial).abs().max(MIN_GAP),
            None => progress.initial.abs().max(MIN_GAP),
        };
        (progress.best - progress.initial) / gap
    }

    pub fn max_absolute_progress(&self, target: Option<f64>) -> f64 {
        self.islands
            .keys()
            .map(|island| self.absolute_progress(*island, target))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Best absolute progress among the other islands.
    pub fn peer_best_progress(&self, island: usize, target: Option<f64>) -> Option<f64> {
        self.islands
            .keys()
            .filter(|k| **k != island)
            .map(|k| self.absolute_progress(*k, target))
            .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
    }

    /// Adapt the policy from the island's momentum and its standing
    /// relative to the best peer.
    pub fn update_policy(
        &mut self,
        momentum: f64,
        absolute_progress: Option<f64>,
        peer_best: Option<f64>,
    ) {
        let lagging = match (peer_best, absolute_progress) {
            (Some(peer), Some(own)) => peer - own > LAG_MARGIN,
            _ => false,
        };
        self.policy
            .update(momentum, lagging, self.config.adaptation_rate);
        debug!(
            explore = self.policy.explore,
            exploit = self.policy.exploit,
            backtrack = self.policy.backtrack,
            "policy updated"
        );
    }

    /// Crossover fires when CE is enabled, the cadence has elapsed, the
    /// island is stagnating, and a peer is meaningfully ahead.
    pub fn should_perform_crossover(
        &self,
        iteration: u64,
        island: usize,
        stagnating: bool,
        target: Option<f64>,
    ) -> bool {
        if !self.config.enable_ce || !stagnating {
            return false;
        }
        if iteration.saturating_sub(self.last_crossover_iteration)
            < self.config.crossover_frequency
        {
            return false;
        }
        let Some(peer_best) = self.peer_best_progress(island, target) else {
            return false;
        };
        peer_best - self.absolute_progress(island, target) > LAG_MARGIN
    }

    pub fn mark_crossover(&mut self, iteration: u64) {
        self.last_crossover_iteration = iteration;
    }

    /// Pick a crossover partner, weighting islands by absolute progress
    /// plus a 0.01 floor. The current island is excluded.
    pub fn choose_partner(
        &mut self,
        island: usize,
        num_islands: usize,
        target: Option<f64>,
    ) -> Option<usize> {
        let candidates: Vec<usize> = (0..num_islands).filter(|i| *i != island).collect();
        if candidates.is_empty() {
            return None;
        }
        let weights: Vec<f64> = candidates
            .iter()
            .map(|i| self.absolute_progress(*i, target).max(0.0) + 0.01)
            .collect();
        let total: f64 = weights.iter().sum();
        let mut draw = self.rng.gen::<f64>() * total;
        for (candidate, weight) in candidates.iter().zip(&weights) {
            draw -= weight;
            if draw <= 0.0 {
                return Some(*candidate);
            }
        }
        candidates.last().copied()
    }

    /// Construct the crossover offspring from the two island bests.
    /// Evaluation is re-run by the controller.
    pub fn build_offspring(
        &self,
        parent1: &Program,
        parent2: &Program,
        source_islands: [usize; 2],
        iteration: u64,
    ) -> Program {
        let generation = parent1.generation.max(parent2.generation) + 1;
        info!(
            parent1 = %parent1.id,
            parent2 = %parent2.id,
            "building crossover offspring"
        );
        Program::new(parent1.code.clone(), parent1.language.clone())
            .with_parent(parent1.id.clone())
            .with_generation(generation)
            .with_iteration(iteration)
            .annotate("crossover", json!(true))
            .annotate("parent1_id", json!(parent1.id))
            .annotate("parent2_id", json!(parent2.id))
            .annotate("source_islands", json!(source_islands))
    }
}
