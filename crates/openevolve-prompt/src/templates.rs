use crate::defaults::BUILT_IN_TEMPLATES;
use crate::error::PromptError;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Loads `.txt` templates from a user directory over the built-in
/// defaults; user names win on collision. A sibling `fragments.json`
/// supplies short interpolation snippets keyed by name.
#[derive(Clone, Debug, Default)]
pub struct TemplateManager {
    templates: HashMap<String, String>,
    fragments: HashMap<String, String>,
}

impl TemplateManager {
    pub fn load(user_dir: Option<&Path>) -> Result<Self, PromptError> {
        let mut templates: HashMap<String, String> = BUILT_IN_TEMPLATES
            .iter()
            .map(|(name, text)| (name.to_string(), text.to_string()))
            .collect();
        let mut fragments = HashMap::new();

        if let Some(dir) = user_dir {
            let entries = std::fs::read_dir(dir).map_err(|source| PromptError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match std::fs::read_to_string(&path) {
                    Ok(text) => {
                        templates.insert(name.to_string(), text);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable template"),
                }
            }

            let fragments_path = dir.join("fragments.json");
            if fragments_path.exists() {
                let raw = std::fs::read_to_string(&fragments_path).map_err(|source| {
                    PromptError::Io {
                        path: fragments_path.clone(),
                        source,
                    }
                })?;
                fragments = serde_json::from_str(&raw)?;
            }
        }

        Ok(Self {
            templates,
            fragments,
        })
    }

    /// Template text by name. Missing templates render as the empty
    /// string with a warning; callers carry on.
    pub fn get(&self, name: &str) -> String {
        match self.templates.get(name) {
            Some(text) => text.clone(),
            None => {
                warn!(template = name, "template not found, rendering empty");
                String::new()
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn fragment(&self, name: &str) -> Option<&str> {
        self.fragments.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_ins_available_without_user_dir() {
        let manager = TemplateManager::load(None).unwrap();
        assert!(manager.get("diff_user").contains("SEARCH"));
        assert!(manager.get("full_rewrite_user").contains("Rewrite"));
    }

    #[test]
    fn missing_template_renders_empty() {
        let manager = TemplateManager::load(None).unwrap();
        assert_eq!(manager.get("no_such_template"), "");
    }

    #[test]
    fn user_templates_win_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("diff_user.txt"), "custom {current_program}").unwrap();
        let manager = TemplateManager::load(Some(dir.path())).unwrap();
        assert_eq!(manager.get("diff_user"), "custom {current_program}");
        // Untouched built-ins survive.
        assert!(manager.get("full_rewrite_user").contains("Rewrite"));
    }

    #[test]
    fn fragments_loaded_from_sibling_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("fragments.json"),
            r#"{"greeting": "hello there"}"#,
        )
        .unwrap();
        let manager = TemplateManager::load(Some(dir.path())).unwrap();
        assert_eq!(manager.fragment("greeting"), Some("hello there"));
        assert_eq!(manager.fragment("absent"), None);
    }

    #[test]
    fn non_txt_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "not a template").unwrap();
        let manager = TemplateManager::load(Some(dir.path())).unwrap();
        assert_eq!(manager.get("notes"), "");
    }

    #[test]
    fn missing_user_dir_is_error() {
        let result = TemplateManager::load(Some(Path::new("/nonexistent/templates")));
        assert!(result.is_err());
    }
}
