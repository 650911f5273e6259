//! Built-in prompt templates, used when the user template directory
//! does not override them.

pub const SYSTEM_MESSAGE: &str = "\
You are an expert software developer tasked with iteratively improving a program.
Your job is to analyze the current program and propose a change that raises its
scores on the evaluation metrics shown to you. Keep the program syntactically
valid and preserve its external behavior contract.
";

pub const EVALUATOR_SYSTEM_MESSAGE: &str = "\
You are a rigorous code reviewer. Given a program, respond with a single JSON
object mapping metric names to numbers between 0.0 and 1.0. Assess readability,
maintainability, and apparent correctness. Respond with JSON only.
";

pub const DIFF_USER: &str = "\
# Current program information
- Language: {language}
- Current performance metrics:
{metrics}
{improvement_areas}
{generation_ideas}
{selection_ideas}
# Evolution history
{evolution_history}
# Current program
```{language}
{current_program}
```
{artifacts}
# Task
Suggest improvements to the program that will lead to better performance on the
specified metrics. Describe each change with a SEARCH/REPLACE block:

<<<<<<< SEARCH
# Original code to find and replace (must match exactly)
=======
# New replacement code
>>>>>>> REPLACE

The SEARCH section must exactly match code fragments of the current program.
";

pub const FULL_REWRITE_USER: &str = "\
# Current program information
- Language: {language}
- Current performance metrics:
{metrics}
{improvement_areas}
{generation_ideas}
{selection_ideas}
# Evolution history
{evolution_history}
# Current program
```{language}
{current_program}
```
{artifacts}
# Task
Rewrite the program to improve its performance on the specified metrics.
Provide the complete new program inside a single fenced code block:

```{language}
# Your rewritten program
```
";

/// Template name → text, in load order.
pub const BUILT_IN_TEMPLATES: &[(&str, &str)] = &[
    ("system_message", SYSTEM_MESSAGE),
    ("evaluator_system_message", EVALUATOR_SYSTEM_MESSAGE),
    ("diff_user", DIFF_USER),
    ("full_rewrite_user", FULL_REWRITE_USER),
];

/// Fixed synonym substitutions for template stochasticity. Deliberately
/// small; whole-word occurrences are replaced with a uniformly random
/// alternate.
pub const SYNONYMS: &[(&str, &[&str])] = &[
    ("improve", &["improve", "enhance", "boost", "refine"]),
    ("Suggest", &["Suggest", "Propose", "Recommend"]),
    ("performance", &["performance", "results", "scores"]),
];
