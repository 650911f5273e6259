use crate::defaults::SYNONYMS;
use crate::templates::TemplateManager;
use openevolve_config::PromptConfig;
use openevolve_core::{program_fitness, Program};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;

/// Assembled prompt messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Everything the sampler needs for one prompt.
pub struct PromptContext<'a> {
    pub current_code: &'a str,
    pub current_metrics: &'a HashMap<String, f64>,
    /// Fitness of the previous candidate on this island, for the
    /// improvement-areas delta.
    pub previous_fitness: Option<f64>,
    pub top_programs: &'a [Program],
    pub inspirations: &'a [Program],
    /// Rendered HCM generation-context ideas.
    pub generation_ideas: &'a [String],
    /// Rendered HCM selection-context ideas.
    pub selection_ideas: &'a [String],
    pub language: &'a str,
    pub iteration: u64,
    pub diff_mode: bool,
    pub feature_dimensions: &'a [String],
    pub feature_coords: &'a [usize],
    pub artifacts: Option<&'a HashMap<String, String>>,
    /// Explicit template override, highest precedence.
    pub template_override: Option<&'a str>,
}

/// Builds `{ system, user }` prompts from the parent program, the
/// evolution history, and the idea memory.
pub struct PromptSampler {
    config: PromptConfig,
    templates: TemplateManager,
    rng: Mutex<StdRng>,
}

impl PromptSampler {
    pub fn new(config: PromptConfig, templates: TemplateManager, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            templates,
            rng: Mutex::new(rng),
        }
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> Prompt {
        let template_name = ctx
            .template_override
            .or(self.config.user_template_override.as_deref())
            .unwrap_or(if ctx.diff_mode {
                "diff_user"
            } else {
                "full_rewrite_user"
            });
        let mut user_template = self.templates.get(template_name);

        let system = match self.config.system_template_override.as_deref() {
            Some(name) => self.templates.get(name),
            None if !self.config.system_message.is_empty() => self.config.system_message.clone(),
            None => self.templates.get("system_message"),
        };

        if self.config.use_template_stochasticity {
            user_template = self.apply_stochasticity(&user_template);
        }

        let fitness = program_fitness(ctx.current_metrics, ctx.feature_dimensions);
        let fields = [
            ("language", ctx.language.to_string()),
            ("iteration", ctx.iteration.to_string()),
            ("current_program", ctx.current_code.to_string()),
            ("metrics", format_metrics(ctx.current_metrics)),
            ("fitness", format!("{:.4}", fitness)),
            (
                "feature_coords",
                format_feature_coords(ctx.feature_dimensions, ctx.feature_coords),
            ),
            (
                "improvement_areas",
                self.improvement_areas(ctx, fitness),
            ),
            ("evolution_history", self.evolution_history(ctx)),
            (
                "generation_ideas",
                format_ideas("Recurring ideas from strong programs", ctx.generation_ideas),
            ),
            (
                "selection_ideas",
                format_ideas("Promising directions to prioritize", ctx.selection_ideas),
            ),
            ("artifacts", self.artifacts_section(ctx)),
        ];

        let mut user = user_template;
        for (key, value) in fields {
            user = user.replace(&format!("{{{}}}", key), &value);
        }

        Prompt { system, user }
    }

    fn improvement_areas(&self, ctx: &PromptContext<'_>, fitness: f64) -> String {
        let mut lines = Vec::new();
        if let Some(previous) = ctx.previous_fitness {
            let delta = fitness - previous;
            if delta > 0.0 {
                lines.push(format!(
                    "- The last change improved fitness by {:.4}; continue in this direction.",
                    delta
                ));
            } else if delta < 0.0 {
                lines.push(format!(
                    "- Fitness dropped by {:.4} since the previous candidate; reconsider the last change.",
                    -delta
                ));
            } else {
                lines.push("- Fitness is flat; try a different kind of change.".to_string());
            }
        }
        if ctx.current_code.len() > self.config.suggest_simplification_after_chars {
            let suggestion = self
                .templates
                .fragment("simplify_suggestion")
                .unwrap_or("- The program is getting long; look for opportunities to simplify.");
            lines.push(suggestion.to_string());
        }
        if lines.is_empty() {
            return String::new();
        }
        format!("# Improvement areas\n{}\n", lines.join("\n"))
    }

    fn evolution_history(&self, ctx: &PromptContext<'_>) -> String {
        let mut sections = Vec::new();
        for program in ctx.top_programs.iter().take(self.config.num_top_programs.min(3)) {
            sections.push(format!(
                "## Top program (fitness {:.4})\n```{}\n{}\n```",
                program.fitness(ctx.feature_dimensions),
                program.language,
                program.code
            ));
        }
        for program in ctx
            .inspirations
            .iter()
            .take(self.config.num_diverse_programs.min(2))
        {
            sections.push(format!(
                "## Inspiration (fitness {:.4})\n```{}\n{}\n```",
                program.fitness(ctx.feature_dimensions),
                program.language,
                program.code
            ));
        }
        if sections.is_empty() {
            return "(no history yet)".to_string();
        }
        sections.join("\n")
    }

    fn artifacts_section(&self, ctx: &PromptContext<'_>) -> String {
        if !self.config.include_artifacts {
            return String::new();
        }
        let Some(artifacts) = ctx.artifacts else {
            return String::new();
        };
        if artifacts.is_empty() {
            return String::new();
        }
        let mut names: Vec<&String> = artifacts.keys().collect();
        names.sort();
        let mut section = String::from("# Last execution output\n");
        for name in names {
            let mut value = artifacts[name].clone();
            if self.config.artifact_security_filter && looks_sensitive(name, &value) {
                continue;
            }
            if value.len() > self.config.max_artifact_bytes {
                value.truncate(self.config.max_artifact_bytes);
                value.push_str("\n... (truncated)");
            }
            section.push_str(&format!("## {}\n```\n{}\n```\n", name, value));
        }
        section
    }

    fn apply_stochasticity(&self, template: &str) -> String {
        let variations: Vec<(String, Vec<String>)> = if self.config.template_variations.is_empty() {
            SYNONYMS
                .iter()
                .map(|(word, alts)| {
                    (
                        word.to_string(),
                        alts.iter().map(|a| a.to_string()).collect(),
                    )
                })
                .collect()
        } else {
            self.config
                .template_variations
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let mut result = template.to_string();
        let Ok(mut rng) = self.rng.lock() else {
            return result;
        };
        for (word, alternates) in variations {
            if alternates.is_empty() {
                continue;
            }
            let pick = &alternates[rng.gen_range(0..alternates.len())];
            result = replace_whole_word(&result, &word, pick);
        }
        result
    }
}

fn format_metrics(metrics: &HashMap<String, f64>) -> String {
    if metrics.is_empty() {
        return "  (not yet evaluated)".to_string();
    }
    let mut names: Vec<&String> = metrics.keys().collect();
    names.sort();
    names
        .iter()
        .map(|name| format!("  - {}: {:.4}", name, metrics[*name]))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_feature_coords(dimensions: &[String], coords: &[usize]) -> String {
    dimensions
        .iter()
        .zip(coords.iter())
        .map(|(d, c)| format!("{}={}", d, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_ideas(title: &str, ideas: &[String]) -> String {
    if ideas.is_empty() {
        return String::new();
    }
    let bullets = ideas
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n");
    format!("# {}\n{}\n", title, bullets)
}

fn looks_sensitive(name: &str, value: &str) -> bool {
    const MARKERS: [&str; 4] = ["api_key", "apikey", "secret", "password"];
    let name = name.to_ascii_lowercase();
    let value = value.to_ascii_lowercase();
    MARKERS
        .iter()
        .any(|m| name.contains(m) || value.contains(m))
}

/// Replace whole-word occurrences of `word` (neighbors must be
/// non-alphanumeric) with `replacement`.
fn replace_whole_word(text: &str, word: &str, replacement: &str) -> String {
    if word.is_empty() || word == replacement {
        return text.to_string();
    }
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut consumed = 0;
    while let Some(rel) = rest.find(word) {
        let abs = consumed + rel;
        let before_ok = abs == 0
            || !text[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        let after = abs + word.len();
        let after_ok = after >= text.len()
            || !text[after..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        result.push_str(&rest[..rel]);
        if before_ok && after_ok {
            result.push_str(replacement);
        } else {
            result.push_str(word);
        }
        rest = &rest[rel + word.len()..];
        consumed = after;
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(config: PromptConfig) -> PromptSampler {
        PromptSampler::new(config, TemplateManager::load(None).unwrap(), Some(1))
    }

    fn metrics(score: f64) -> HashMap<String, f64> {
        HashMap::from([("combined_score".to_string(), score)])
    }

    fn base_ctx<'a>(code: &'a str, m: &'a HashMap<String, f64>) -> PromptContext<'a> {
        PromptContext {
            current_code: code,
            current_metrics: m,
            previous_fitness: None,
            top_programs: &[],
            inspirations: &[],
            generation_ideas: &[],
            selection_ideas: &[],
            language: "python",
            iteration: 1,
            diff_mode: true,
            feature_dimensions: &[],
            feature_coords: &[],
            artifacts: None,
            template_override: None,
        }
    }

    #[test]
    fn diff_mode_uses_diff_template() {
        let m = metrics(0.5);
        let prompt = sampler(PromptConfig::default()).build(&base_ctx("x = 1", &m));
        assert!(prompt.user.contains("<<<<<<< SEARCH"));
        assert!(prompt.user.contains("x = 1"));
    }

    #[test]
    fn full_rewrite_mode_uses_rewrite_template() {
        let m = metrics(0.5);
        let mut ctx = base_ctx("x = 1", &m);
        ctx.diff_mode = false;
        let prompt = sampler(PromptConfig::default()).build(&ctx);
        assert!(prompt.user.contains("Rewrite the program"));
    }

    #[test]
    fn explicit_override_wins() {
        let m = metrics(0.5);
        let mut ctx = base_ctx("x = 1", &m);
        ctx.template_override = Some("full_rewrite_user");
        let prompt = sampler(PromptConfig::default()).build(&ctx);
        assert!(prompt.user.contains("Rewrite the program"));
    }

    #[test]
    fn configured_system_message_wins() {
        let config = PromptConfig {
            system_message: "be brief".to_string(),
            ..PromptConfig::default()
        };
        let m = metrics(0.5);
        let prompt = sampler(config).build(&base_ctx("x", &m));
        assert_eq!(prompt.system, "be brief");
    }

    #[test]
    fn metrics_rendered_sorted() {
        let m = HashMap::from([
            ("b_metric".to_string(), 0.5),
            ("a_metric".to_string(), 0.25),
        ]);
        let prompt = sampler(PromptConfig::default()).build(&base_ctx("x", &m));
        let a_pos = prompt.user.find("a_metric").unwrap();
        let b_pos = prompt.user.find("b_metric").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn improvement_delta_reported() {
        let m = metrics(0.8);
        let mut ctx = base_ctx("x", &m);
        ctx.previous_fitness = Some(0.5);
        let prompt = sampler(PromptConfig::default()).build(&ctx);
        assert!(prompt.user.contains("improved fitness by 0.3000"));
    }

    #[test]
    fn long_program_gets_simplification_hint() {
        let config = PromptConfig {
            suggest_simplification_after_chars: 10,
            ..PromptConfig::default()
        };
        let m = metrics(0.5);
        let code = "x".repeat(50);
        let prompt = sampler(config).build(&base_ctx(&code, &m));
        assert!(prompt.user.contains("simplify"));
    }

    #[test]
    fn history_limited_to_three_and_two() {
        let tops: Vec<Program> = (0..5)
            .map(|i| Program::new(format!("top{}", i), "python"))
            .collect();
        let insp: Vec<Program> = (0..4)
            .map(|i| Program::new(format!("insp{}", i), "python"))
            .collect();
        let m = metrics(0.5);
        let mut ctx = base_ctx("x", &m);
        ctx.top_programs = &tops;
        ctx.inspirations = &insp;
        let prompt = sampler(PromptConfig::default()).build(&ctx);
        assert!(prompt.user.contains("top2"));
        assert!(!prompt.user.contains("top3"));
        assert!(prompt.user.contains("insp1"));
        assert!(!prompt.user.contains("insp2"));
    }

    #[test]
    fn ideas_rendered_as_bullets() {
        let m = metrics(0.5);
        let ideas = vec!["memoize the inner loop".to_string()];
        let mut ctx = base_ctx("x", &m);
        ctx.generation_ideas = &ideas;
        let prompt = sampler(PromptConfig::default()).build(&ctx);
        assert!(prompt.user.contains("- memoize the inner loop"));
    }

    #[test]
    fn artifacts_truncated() {
        let config = PromptConfig {
            max_artifact_bytes: 8,
            ..PromptConfig::default()
        };
        let m = metrics(0.5);
        let artifacts = HashMap::from([("stdout".to_string(), "0123456789abcdef".to_string())]);
        let mut ctx = base_ctx("x", &m);
        ctx.artifacts = Some(&artifacts);
        let prompt = sampler(config).build(&ctx);
        assert!(prompt.user.contains("01234567"));
        assert!(prompt.user.contains("(truncated)"));
        assert!(!prompt.user.contains("abcdef"));
    }

    #[test]
    fn sensitive_artifacts_filtered() {
        let m = metrics(0.5);
        let artifacts =
            HashMap::from([("stderr".to_string(), "leaked api_key=sk-123".to_string())]);
        let mut ctx = base_ctx("x", &m);
        ctx.artifacts = Some(&artifacts);
        let prompt = sampler(PromptConfig::default()).build(&ctx);
        assert!(!prompt.user.contains("sk-123"));
    }

    #[test]
    fn stochasticity_replaces_whole_words_only() {
        let replaced = replace_whole_word("improve improvements improve", "improve", "boost");
        assert_eq!(replaced, "boost improvements boost");
    }

    #[test]
    fn no_unresolved_placeholders_in_defaults() {
        let m = metrics(0.5);
        let prompt = sampler(PromptConfig::default()).build(&base_ctx("x = 1", &m));
        for key in [
            "{metrics}",
            "{current_program}",
            "{language}",
            "{evolution_history}",
            "{artifacts}",
        ] {
            assert!(!prompt.user.contains(key), "unresolved {}", key);
        }
    }
}
