use std::path::PathBuf;

/// Errors from the program database.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("island {0} has no resident programs")]
    EmptyIsland(usize),
    #[error("island index {0} out of range")]
    UnknownIsland(usize),
    #[error("checkpoint file missing: {0}")]
    CheckpointMissing(PathBuf),
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("program {0} not found")]
    ProgramNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_island_display() {
        assert!(format!("{}", DatabaseError::EmptyIsland(3)).contains("island 3"));
    }
}
