use openevolve_config::PacEvolveConfig;
use openevolve_core::{levenshtein, Program};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use uuid::Uuid;

/// One concrete example of an idea, extracted from a program.
#[derive(Clone, Debug)]
pub struct IdeaHypothesis {
    pub summary: String,
    pub program_id: String,
    pub iteration: u64,
    pub score: f64,
    pub stale: bool,
}

/// A recurring concept seen in high-scoring programs.
#[derive(Clone, Debug)]
pub struct IdeaCluster {
    pub id: String,
    pub title: String,
    pub summary: String,
    /// Last-touched iteration.
    pub iteration: u64,
    /// Representative score (max over hypotheses).
    pub score: f64,
    pub stale: bool,
    pub hypotheses: Vec<IdeaHypothesis>,
    /// Summaries discarded by the per-cluster hypothesis cap.
    pub pruned_summaries: Vec<String>,
}

/// Hierarchical Context Management: an idea-cluster memory split into
/// generation and selection sets, with staleness-driven pruning into a
/// bounded historical buffer.
pub struct HierarchicalContextManager {
    config: PacEvolveConfig,
    clusters: HashMap<String, IdeaCluster>,
    generation_ids: HashSet<String>,
    selection_ids: HashSet<String>,
    historical: VecDeque<IdeaCluster>,
}

impl HierarchicalContextManager {
    pub fn new(config: PacEvolveConfig) -> Self {
        Self {
            config,
            clusters: HashMap::new(),
            generation_ids: HashSet::new(),
            selection_ids: HashSet::new(),
            historical: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn historical_len(&self) -> usize {
        self.historical.len()
    }

    /// Ingest a freshly evaluated program as a hypothesis, clustering
    /// it with the most similar existing idea or opening a new one.
    pub fn add_idea(&mut self, program: &Program, iteration: u64) {
        let summary = normalize_summary(&program.code, self.config.hypothesis_summary_max_chars);
        if summary.is_empty() {
            return;
        }
        let score = program.fitness(&[]);

        let cluster_id = match self.most_similar_cluster(&summary) {
            Some((id, similarity)) if similarity > self.config.idea_distinctness_threshold => id,
            _ => {
                let id = Uuid::new_v4().to_string();
                let cluster = IdeaCluster {
                    id: id.clone(),
                    title: make_title(&summary),
                    summary: truncate_chars(&summary, self.config.idea_summary_max_chars),
                    iteration,
                    score,
                    stale: false,
                    hypotheses: Vec::new(),
                    pruned_summaries: Vec::new(),
                };
                self.clusters.insert(id.clone(), cluster);
                debug!(cluster = %id, "opened new idea cluster");
                id
            }
        };

        if let Some(cluster) = self.clusters.get_mut(&cluster_id) {
            cluster.hypotheses.push(IdeaHypothesis {
                summary: summary.clone(),
                program_id: program.id.clone(),
                iteration,
                score,
                stale: false,
            });
            cluster.score = cluster.score.max(score);
            cluster.iteration = iteration;
            cluster.stale = false;

            // Hypothesis cap: keep the highest-scoring, remember the rest.
            if cluster.hypotheses.len() > self.config.max_hypotheses_per_idea.max(1) {
                cluster.hypotheses.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let discarded = cluster
                    .hypotheses
                    .split_off(self.config.max_hypotheses_per_idea.max(1));
                cluster
                    .pruned_summaries
                    .extend(discarded.into_iter().map(|h| h.summary));
            }
        }

        self.generation_ids.insert(cluster_id.clone());
        if score >= self.config.pruning_threshold {
            self.selection_ids.insert(cluster_id);
        }

        self.enforce_cluster_cap();
    }

    fn most_similar_cluster(&self, summary: &str) -> Option<(String, f64)> {
        self.clusters
            .values()
            .map(|cluster| (cluster.id.clone(), similarity(&cluster.summary, summary)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    fn enforce_cluster_cap(&mut self) {
        while self.clusters.len() > self.config.max_ideas.max(1) {
            // Lowest score first, oldest iteration breaking ties.
            let Some(victim) = self
                .clusters
                .values()
                .min_by(|a, b| {
                    a.score
                        .partial_cmp(&b.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.iteration.cmp(&b.iteration))
                })
                .map(|c| c.id.clone())
            else {
                return;
            };
            self.retire_cluster(&victim);
        }
    }

    fn retire_cluster(&mut self, id: &str) {
        if let Some(cluster) = self.clusters.remove(id) {
            self.historical.push_back(cluster);
            while self.historical.len() > 2 * self.config.max_ideas.max(1) {
                self.historical.pop_front();
            }
        }
        self.generation_ids.remove(id);
        self.selection_ids.remove(id);
    }

    /// Mark hypotheses stale past `pruning_interval`, and retire
    /// clusters with no fresh hypotheses (or that are themselves old)
    /// into the historical buffer.
    pub fn prune_stale_ideas(&mut self, iteration: u64) {
        let interval = self.config.pruning_interval;
        let mut retired: Vec<String> = Vec::new();
        for cluster in self.clusters.values_mut() {
            for hypothesis in &mut cluster.hypotheses {
                if iteration.saturating_sub(hypothesis.iteration) > interval {
                    hypothesis.stale = true;
                }
            }
            let no_fresh = cluster.hypotheses.iter().all(|h| h.stale);
            let too_old = iteration.saturating_sub(cluster.iteration) > interval;
            if no_fresh || too_old {
                cluster.stale = true;
                retired.push(cluster.id.clone());
            }
        }
        for id in retired {
            self.retire_cluster(&id);
        }
    }

    /// Active, non-stale clusters referenced by the generation set,
    /// best score first.
    pub fn generation_context(&self) -> Vec<&IdeaCluster> {
        self.context_for(&self.generation_ids)
    }

    /// Active, non-stale clusters referenced by the selection set,
    /// best score first.
    pub fn selection_context(&self) -> Vec<&IdeaCluster> {
        self.context_for(&self.selection_ids)
    }

    fn context_for(&self, ids: &HashSet<String>) -> Vec<&IdeaCluster> {
        let mut clusters: Vec<&IdeaCluster> = ids
            .iter()
            .filter_map(|id| self.clusters.get(id))
            .filter(|c| !c.stale)
            .collect();
        clusters.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        clusters
    }

    /// Clear the selection set after a backtrack.
    pub fn reset_for_backtrack(&mut self) {
        self.selection_ids.clear();
    }

    #[cfg(test)]
    fn active_id_invariant_holds(&self) -> bool {
        self.generation_ids
            .iter()
            .chain(self.selection_ids.iter())
            .all(|id| self.clusters.contains_key(id))
    }
}

fn normalize_summary(code: &str, max_chars: usize) -> String {
    let collapsed = code.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars.max(1)).collect()
}

/// `1 - editDistance / maxLen`, in [0, 1].
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// First sentence of the summary, capped at 80 chars.
fn make_title(summary: &str) -> String {
    let first_sentence = summary.split('.').next().unwrap_or(summary);
    truncate_chars(first_sentence.trim(), 80)
}
