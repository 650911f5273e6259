use crate::error::ConfigError;
use crate::types::{Config, ModelConfig};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

impl Config {
    /// Load and validate a YAML config file. `${NAME}` string values
    /// resolve from the process environment; an unset variable fails
    /// the load.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse config from a YAML string (see [`Config::load`]).
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut value: Value = serde_yaml::from_str(raw)?;
        resolve_env(&mut value)?;
        let mut config: Config = serde_yaml::from_value(value)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML at `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `$HOME/.openevolve/ui_config.yaml`: the persistent config the
    /// shell writes and the engine reads when no explicit path is given.
    pub fn user_config_path() -> Result<PathBuf, ConfigError> {
        let home = std::env::var_os("HOME").ok_or(ConfigError::NoHomeDir)?;
        Ok(PathBuf::from(home).join(".openevolve").join("ui_config.yaml"))
    }

    /// The persistent user config when present, defaults otherwise.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::user_config_path() {
            Ok(path) if path.exists() => {
                info!(path = %path.display(), "loading persistent user config");
                Self::load(path)
            }
            _ => {
                let mut config = Config::default();
                config.apply_defaults();
                Ok(config)
            }
        }
    }

    /// Loader defaults: primary/secondary model shortcuts, the
    /// gpt-4o-mini fallback, evaluator-model reuse, and env-var
    /// credential backfill.
    pub fn apply_defaults(&mut self) {
        if self.llm.models.is_empty() {
            if let Some(primary) = self.llm.primary_model.clone() {
                self.llm.models.push(ModelConfig::named(
                    primary,
                    self.llm.primary_model_weight.unwrap_or(1.0),
                ));
                if let Some(secondary) = self.llm.secondary_model.clone() {
                    self.llm.models.push(ModelConfig::named(
                        secondary,
                        self.llm.secondary_model_weight.unwrap_or(1.0),
                    ));
                }
            }
        }
        if self.llm.models.is_empty() {
            self.llm.models.push(ModelConfig::named("gpt-4o-mini", 1.0));
        }
        if self.llm.evaluator_models.is_empty() {
            self.llm.evaluator_models = self.llm.models.clone();
        }
        if self.llm.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                info!("using OPENAI_API_KEY from environment");
                self.llm.api_key = key;
            } else {
                warn!("no LLM API key in config or environment");
            }
        }
        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            if self.llm.api_base == crate::types::LlmConfig::default().api_base {
                self.llm.api_base = base;
            }
        }
    }

    /// Reject nonsensical values before the engine is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.num_islands == 0 {
            return Err(ConfigError::Invalid("numIslands must be at least 1".into()));
        }
        if self.database.population_size == 0 {
            return Err(ConfigError::Invalid(
                "populationSize must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.database.migration_rate) {
            return Err(ConfigError::Invalid(
                "migrationRate must be within [0, 1]".into(),
            ));
        }
        let p = &self.pacevolve;
        for (name, prob) in [
            ("initialExploreProb", p.initial_explore_prob),
            ("initialExploitProb", p.initial_exploit_prob),
            ("initialBacktrackProb", p.initial_backtrack_prob),
        ] {
            if !(0.0..=1.0).contains(&prob) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [0, 1]",
                    name
                )));
            }
        }
        if p.adaptation_rate <= 0.0 {
            return Err(ConfigError::Invalid(
                "adaptationRate must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&p.momentum_beta) {
            return Err(ConfigError::Invalid(
                "momentumBeta must be within [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// Recursively substitute `${NAME}` string values from the process
/// environment.
fn resolve_env(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                let resolved = std::env::var(name)
                    .map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
                *s = resolved;
            }
            Ok(())
        }
        Value::Sequence(seq) => {
            for item in seq {
                resolve_env(item)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                resolve_env(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_resolution() {
        std::env::set_var("OE_TEST_KEY", "sk-abc");
        let config =
            Config::from_yaml_str("llm:\n  apiKey: \"${OE_TEST_KEY}\"\n").unwrap();
        assert_eq!(config.llm.api_key, "sk-abc");
        std::env::remove_var("OE_TEST_KEY");
    }

    #[test]
    fn missing_env_var_is_fatal() {
        std::env::remove_var("OE_TEST_MISSING");
        let err = Config::from_yaml_str("llm:\n  apiKey: \"${OE_TEST_MISSING}\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "OE_TEST_MISSING"));
    }

    #[test]
    fn default_model_inserted() {
        let config = Config::from_yaml_str("maxIterations: 5\n").unwrap();
        assert_eq!(config.llm.models.len(), 1);
        assert_eq!(config.llm.models[0].name, "gpt-4o-mini");
        assert_eq!(config.llm.models[0].weight, 1.0);
    }

    #[test]
    fn evaluator_models_reuse_models() {
        let yaml = "llm:\n  models:\n    - name: gpt-4o\n      weight: 1.0\n";
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.llm.evaluator_models.len(), 1);
        assert_eq!(config.llm.evaluator_models[0].name, "gpt-4o");
    }

    #[test]
    fn primary_secondary_shortcut() {
        let yaml = "llm:\n  primaryModel: gpt-4o\n  primaryModelWeight: 0.8\n  secondaryModel: gpt-4o-mini\n  secondaryModelWeight: 0.2\n";
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.llm.models.len(), 2);
        assert_eq!(config.llm.models[0].name, "gpt-4o");
        assert_eq!(config.llm.models[1].weight, 0.2);
    }

    #[test]
    fn zero_islands_rejected() {
        let err = Config::from_yaml_str("database:\n  numIslands: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_probability_rejected() {
        let err =
            Config::from_yaml_str("pacevolve:\n  initialExploreProb: 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.max_iterations = 7;
        config.save(&path).unwrap();
        let restored = Config::load(&path).unwrap();
        assert_eq!(restored.max_iterations, 7);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
