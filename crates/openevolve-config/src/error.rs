use std::path::PathBuf;

/// Errors raised while loading or validating configuration. All of
/// these are fatal at startup; the engine is never constructed on a
/// bad config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("environment variable {0} referenced in config is not set")]
    MissingEnvVar(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("home directory could not be determined")]
    NoHomeDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_var_display() {
        let e = ConfigError::MissingEnvVar("OPENAI_API_KEY".into());
        assert!(format!("{}", e).contains("OPENAI_API_KEY"));
    }
}
