use std::path::PathBuf;

/// Errors from template loading. A missing individual template is not
/// an error; it renders empty with a warning.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("failed to read template directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid fragments.json: {0}")]
    Fragments(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_path() {
        let e = PromptError::Io {
            path: PathBuf::from("/tmp/templates"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(format!("{}", e).contains("/tmp/templates"));
    }
}
