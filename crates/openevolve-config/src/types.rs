use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Full engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub max_iterations: u64,
    pub checkpoint_interval: u64,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub random_seed: Option<u64>,
    pub language: String,
    pub file_suffix: String,
    /// SEARCH/REPLACE diff mode vs. full rewrites.
    pub diff_based_evolution: bool,
    /// Stop early once the best score reaches this value.
    pub target_score: Option<f64>,
    pub llm: LlmConfig,
    pub prompt: PromptConfig,
    pub database: DatabaseConfig,
    pub evaluator: EvaluatorConfig,
    pub pacevolve: PacEvolveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            checkpoint_interval: 100,
            log_level: "info".to_string(),
            log_dir: None,
            random_seed: None,
            language: "python".to_string(),
            file_suffix: ".ts".to_string(),
            diff_based_evolution: true,
            target_score: None,
            llm: LlmConfig::default(),
            prompt: PromptConfig::default(),
            database: DatabaseConfig::default(),
            evaluator: EvaluatorConfig::default(),
            pacevolve: PacEvolveConfig::default(),
        }
    }
}

/// One model in the ensemble. Unset fields fall back to the shared
/// [`LlmConfig`] values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    pub name: String,
    pub weight: f64,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay: Option<f64>,
    pub random_seed: Option<u64>,
    pub reasoning_effort: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            weight: 1.0,
            api_base: None,
            api_key: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            timeout: None,
            retries: None,
            retry_delay: None,
            random_seed: None,
            reasoning_effort: None,
        }
    }
}

impl ModelConfig {
    pub fn named(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            ..Self::default()
        }
    }
}

/// Shared LLM transport settings plus the ensemble model lists.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    /// Request timeout in seconds.
    pub timeout: u64,
    pub retries: u32,
    /// Spacing between retries in seconds.
    pub retry_delay: f64,
    pub random_seed: Option<u64>,
    pub reasoning_effort: Option<String>,
    pub models: Vec<ModelConfig>,
    pub evaluator_models: Vec<ModelConfig>,
    pub primary_model: Option<String>,
    pub primary_model_weight: Option<f64>,
    pub secondary_model: Option<String>,
    pub secondary_model_weight: Option<f64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            temperature: 0.7,
            top_p: 0.95,
            max_tokens: 4096,
            timeout: 60,
            retries: 3,
            retry_delay: 5.0,
            random_seed: None,
            reasoning_effort: None,
            models: Vec::new(),
            evaluator_models: Vec::new(),
            primary_model: None,
            primary_model_weight: None,
            secondary_model: None,
            secondary_model_weight: None,
        }
    }
}

/// Prompt construction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptConfig {
    pub system_message: String,
    pub evaluator_system_message: String,
    pub num_top_programs: usize,
    pub num_diverse_programs: usize,
    pub use_template_stochasticity: bool,
    pub template_variations: HashMap<String, Vec<String>>,
    pub include_artifacts: bool,
    pub max_artifact_bytes: usize,
    pub artifact_security_filter: bool,
    pub suggest_simplification_after_chars: usize,
    /// Directory of user `.txt` templates overriding the built-ins.
    pub template_dir: Option<String>,
    /// Explicit user template override, highest precedence.
    pub user_template_override: Option<String>,
    /// Explicit system template override, highest precedence.
    pub system_template_override: Option<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_message: String::new(),
            evaluator_system_message: String::new(),
            num_top_programs: 3,
            num_diverse_programs: 2,
            use_template_stochasticity: false,
            template_variations: HashMap::new(),
            include_artifacts: true,
            max_artifact_bytes: 20 * 1024,
            artifact_security_filter: true,
            suggest_simplification_after_chars: 500,
            template_dir: None,
            user_template_override: None,
            system_template_override: None,
        }
    }
}

/// Per-dimension bin counts: one scalar for all dimensions or an
/// explicit map.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureBins {
    Uniform(usize),
    PerDimension(HashMap<String, usize>),
}

impl FeatureBins {
    pub fn for_dimension(&self, name: &str) -> usize {
        match self {
            FeatureBins::Uniform(n) => (*n).max(1),
            FeatureBins::PerDimension(map) => map.get(name).copied().unwrap_or(10).max(1),
        }
    }
}

impl Default for FeatureBins {
    fn default() -> Self {
        FeatureBins::Uniform(10)
    }
}

/// Program database settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub population_size: usize,
    pub archive_size: usize,
    pub num_islands: usize,
    pub elite_selection_ratio: f64,
    pub exploration_ratio: f64,
    pub exploitation_ratio: f64,
    pub diversity_metric: String,
    pub feature_dimensions: Vec<String>,
    pub feature_bins: FeatureBins,
    pub diversity_reference_size: usize,
    /// Migration cadence in island generations.
    pub migration_interval: u64,
    pub migration_rate: f64,
    pub random_seed: Option<u64>,
    pub artifact_size_threshold: usize,
    pub cleanup_old_artifacts: bool,
    pub artifact_retention_days: u32,
    pub similarity_threshold: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            population_size: 1000,
            archive_size: 100,
            num_islands: 5,
            elite_selection_ratio: 0.1,
            exploration_ratio: 0.2,
            exploitation_ratio: 0.7,
            diversity_metric: "edit_distance".to_string(),
            feature_dimensions: vec!["complexity".to_string(), "diversity".to_string()],
            feature_bins: FeatureBins::default(),
            diversity_reference_size: 20,
            migration_interval: 50,
            migration_rate: 0.1,
            random_seed: None,
            artifact_size_threshold: 32 * 1024,
            cleanup_old_artifacts: true,
            artifact_retention_days: 30,
            similarity_threshold: 0.99,
        }
    }
}

/// Evaluation pipeline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluatorConfig {
    /// Per-invocation timeout in seconds.
    pub timeout: u64,
    pub max_retries: u32,
    pub cascade_evaluation: bool,
    pub cascade_thresholds: Vec<f64>,
    pub parallel_evaluations: usize,
    pub use_llm_feedback: bool,
    pub llm_feedback_weight: f64,
    pub enable_artifacts: bool,
    pub max_artifact_storage: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            timeout: 300,
            max_retries: 3,
            cascade_evaluation: false,
            cascade_thresholds: vec![0.5, 0.75],
            parallel_evaluations: 1,
            use_llm_feedback: false,
            llm_feedback_weight: 0.1,
            enable_artifacts: true,
            max_artifact_storage: 100 * 1024 * 1024,
        }
    }
}

/// PACEvolve adaptive scheduler settings (HCM + MBB + CE).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PacEvolveConfig {
    pub enable_hcm: bool,
    pub idea_memory_size: usize,
    pub pruning_threshold: f64,
    pub pruning_interval: u64,
    pub max_ideas: usize,
    pub max_hypotheses_per_idea: usize,
    pub idea_distinctness_threshold: f64,
    pub idea_summary_max_chars: usize,
    pub hypothesis_summary_max_chars: usize,
    pub enable_mbb: bool,
    pub momentum_window_size: usize,
    pub stagnation_threshold: f64,
    pub backtrack_depth: usize,
    pub momentum_beta: f64,
    pub backtrack_power: f64,
    pub enable_ce: bool,
    pub initial_explore_prob: f64,
    pub initial_exploit_prob: f64,
    pub initial_backtrack_prob: f64,
    pub adaptation_rate: f64,
    pub crossover_frequency: u64,
}

impl Default for PacEvolveConfig {
    fn default() -> Self {
        Self {
            enable_hcm: true,
            idea_memory_size: 50,
            pruning_threshold: 0.5,
            pruning_interval: 20,
            max_ideas: 50,
            max_hypotheses_per_idea: 5,
            idea_distinctness_threshold: 0.6,
            idea_summary_max_chars: 300,
            hypothesis_summary_max_chars: 200,
            enable_mbb: true,
            momentum_window_size: 10,
            stagnation_threshold: 0.01,
            backtrack_depth: 5,
            momentum_beta: 0.9,
            backtrack_power: 1.5,
            enable_ce: true,
            initial_explore_prob: 0.4,
            initial_exploit_prob: 0.4,
            initial_backtrack_prob: 0.2,
            adaptation_rate: 0.05,
            crossover_frequency: 20,
        }
    }
}
