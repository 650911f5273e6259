/// Errors from core utilities.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid diff pattern: {0}")]
    InvalidDiffPattern(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = regex::Regex::new("(").unwrap_err();
        let e = CoreError::from(e);
        assert!(format!("{}", e).contains("invalid diff pattern"));
    }
}
