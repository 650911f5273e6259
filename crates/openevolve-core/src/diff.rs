use crate::error::CoreError;
use regex::Regex;

/// Default SEARCH/REPLACE block pattern. Dot matches newline so each
/// section may span multiple lines.
pub const DEFAULT_DIFF_PATTERN: &str =
    r"(?s)<<<<<<< SEARCH\n(.*?)=======\n(.*?)>>>>>>> REPLACE";

/// One parsed SEARCH/REPLACE pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffBlock {
    pub search: String,
    pub replace: String,
}

impl DiffBlock {
    /// The inverse block: applying it undoes this one.
    pub fn inverse(&self) -> Self {
        Self {
            search: self.replace.clone(),
            replace: self.search.clone(),
        }
    }
}

/// Scans LLM responses for SEARCH/REPLACE blocks with a single
/// multiline regex.
#[derive(Clone, Debug)]
pub struct DiffParser {
    pattern: Regex,
}

impl DiffParser {
    /// Parser with the default block pattern.
    pub fn new() -> Result<Self, CoreError> {
        Self::with_pattern(DEFAULT_DIFF_PATTERN)
    }

    /// Parser with a caller-supplied pattern. The pattern must expose
    /// two capture groups: search text and replace text.
    pub fn with_pattern(pattern: &str) -> Result<Self, CoreError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Extract all blocks from a response. Empty result means no diff
    /// was found.
    pub fn parse(&self, response: &str) -> Vec<DiffBlock> {
        self.pattern
            .captures_iter(response)
            .filter_map(|caps| {
                let search = caps.get(1)?.as_str().to_string();
                let replace = caps.get(2)?.as_str().to_string();
                Some(DiffBlock { search, replace })
            })
            .collect()
    }
}

/// Apply blocks in order, replacing the first literal occurrence of
/// each `search` in the current text. Non-matching blocks are skipped;
/// when no block matches, the original text is returned unchanged.
pub fn apply_diff(code: &str, blocks: &[DiffBlock]) -> String {
    let mut current = code.to_string();
    for block in blocks {
        if let Some(pos) = current.find(&block.search) {
            current.replace_range(pos..pos + block.search.len(), &block.replace);
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(search: &str, replace: &str) -> String {
        format!(
            "<<<<<<< SEARCH\n{}=======\n{}>>>>>>> REPLACE",
            search, replace
        )
    }

    #[test]
    fn parses_single_block() {
        let parser = DiffParser::new().unwrap();
        let response = block("x = 1\n", "x = 2\n");
        let blocks = parser.parse(&response);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].search, "x = 1\n");
        assert_eq!(blocks[0].replace, "x = 2\n");
    }

    #[test]
    fn parses_multiple_blocks_in_order() {
        let parser = DiffParser::new().unwrap();
        let response = format!("{}\nsome prose\n{}", block("a\n", "b\n"), block("c\n", "d\n"));
        let blocks = parser.parse(&response);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].search, "a\n");
        assert_eq!(blocks[1].search, "c\n");
    }

    #[test]
    fn no_blocks_found() {
        let parser = DiffParser::new().unwrap();
        assert!(parser.parse("just prose, no diff").is_empty());
    }

    #[test]
    fn multiline_sections() {
        let parser = DiffParser::new().unwrap();
        let response = block("line1\nline2\n", "line3\n");
        let blocks = parser.parse(&response);
        assert_eq!(blocks[0].search, "line1\nline2\n");
    }

    #[test]
    fn apply_replaces_first_occurrence() {
        let blocks = vec![DiffBlock {
            search: "x".into(),
            replace: "y".into(),
        }];
        assert_eq!(apply_diff("x + x", &blocks), "y + x");
    }

    #[test]
    fn apply_skips_non_matching() {
        let blocks = vec![
            DiffBlock {
                search: "missing".into(),
                replace: "nope".into(),
            },
            DiffBlock {
                search: "1".into(),
                replace: "2".into(),
            },
        ];
        assert_eq!(apply_diff("x = 1", &blocks), "x = 2");
    }

    #[test]
    fn apply_nothing_matches_returns_original() {
        let blocks = vec![DiffBlock {
            search: "absent".into(),
            replace: "there".into(),
        }];
        assert_eq!(apply_diff("x = 1", &blocks), "x = 1");
    }

    #[test]
    fn apply_sequential_blocks_see_prior_edits() {
        let blocks = vec![
            DiffBlock {
                search: "a".into(),
                replace: "b".into(),
            },
            DiffBlock {
                search: "b".into(),
                replace: "c".into(),
            },
        ];
        assert_eq!(apply_diff("a", &blocks), "c");
    }

    #[test]
    fn diff_round_trip() {
        // X occurs exactly once: apply then inverse restores the input.
        let code = "fn main() { let x = 1; }";
        let forward = vec![DiffBlock {
            search: "let x = 1;".into(),
            replace: "let x = 2;".into(),
        }];
        let mutated = apply_diff(code, &forward);
        let inverse: Vec<DiffBlock> = forward.iter().map(DiffBlock::inverse).collect();
        assert_eq!(apply_diff(&mutated, &inverse), code);
    }

    #[test]
    fn custom_pattern() {
        let parser = DiffParser::with_pattern(r"(?s)@@OLD\n(.*?)@@NEW\n(.*?)@@END").unwrap();
        let blocks = parser.parse("@@OLD\nfoo\n@@NEW\nbar\n@@END");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].search, "foo\n");
    }

    #[test]
    fn invalid_pattern_is_error() {
        assert!(DiffParser::with_pattern("(unclosed").is_err());
    }
}
