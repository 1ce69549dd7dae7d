//! Recipe definitions - the declarative config for one LLM call

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use turnstore::PathType;

use super::error::PackError;

/// One input document in a recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDocSpec {
    /// Document name or path, resolved per `path_type`
    pub path: String,

    /// turn | repo | absolute | session
    #[serde(default = "default_path_type")]
    pub path_type: String,

    /// Explicit per-doc token allotment
    #[serde(default)]
    pub max_tokens: Option<usize>,

    /// Missing optional docs are skipped silently
    #[serde(default)]
    pub optional: bool,
}

fn default_path_type() -> String {
    "turn".to_string()
}

impl InputDocSpec {
    /// Parse the `path_type` string into the store's enum
    pub fn resolved_path_type(&self) -> Result<PathType, PackError> {
        self.path_type
            .parse()
            .map_err(|_| PackError::Configuration(format!("Unknown path_type: {}", self.path_type)))
    }
}

/// Hard token budget for a pack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Total prompt budget (prompts + input docs)
    pub total: usize,

    /// Reserved for the model's output
    pub output: usize,

    /// Safety margin held back from input docs
    #[serde(default)]
    pub buffer: usize,
}

/// How to trim when the assembled pack exceeds budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimMethod {
    #[default]
    TruncateEnd,
    DropOldest,
    Summarize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimmingStrategy {
    #[serde(default)]
    pub method: TrimMethod,

    /// Item classes in trim order (currently `input_docs`)
    #[serde(default)]
    pub priority: Vec<String>,
}

impl Default for TrimmingStrategy {
    fn default() -> Self {
        Self {
            method: TrimMethod::TruncateEnd,
            priority: vec!["input_docs".to_string()],
        }
    }
}

/// Raw LLM params carried by the recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmParams {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            max_tokens: 2048,
        }
    }
}

/// The declarative config pairing prompts, input docs, budget, and params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,

    /// Prompt fragment names, loaded in order through the PromptLoader
    pub prompt_fragments: Vec<String>,

    #[serde(default)]
    pub input_docs: Vec<InputDocSpec>,

    pub token_budget: TokenBudget,

    #[serde(default)]
    pub trimming_strategy: Option<TrimmingStrategy>,

    #[serde(default)]
    pub llm_params: LlmParams,
}

impl Recipe {
    /// Load a recipe from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PackError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Recipe::load: called");
        if !path.exists() {
            return Err(PackError::Configuration(format!(
                "Recipe not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let recipe: Recipe = serde_yaml::from_str(&content)
            .map_err(|e| PackError::Configuration(format!("Broken recipe {}: {}", path.display(), e)))?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Load a named recipe from a directory (`<dir>/<name>.yml`)
    pub fn load_named(recipes_dir: impl AsRef<Path>, name: &str) -> Result<Self, PackError> {
        Self::load(recipes_dir.as_ref().join(format!("{}.yml", name)))
    }

    /// Load a named recipe, falling back to the built-in default
    pub fn load_or_builtin(recipes_dir: impl AsRef<Path>, name: &str) -> Result<Self, PackError> {
        let path = recipes_dir.as_ref().join(format!("{}.yml", name));
        if path.exists() {
            return Self::load(path);
        }
        Self::builtin(name).ok_or_else(|| PackError::Configuration(format!("No recipe or builtin named {}", name)))
    }

    /// Built-in default recipes for the engine's own LLM calls
    ///
    /// Each pairs the role's prompt fragment with `context.md` (plus the
    /// role's extra input docs) under a conservative budget.
    pub fn builtin(name: &str) -> Option<Self> {
        let doc = |path: &str, optional: bool| InputDocSpec {
            path: path.to_string(),
            path_type: "turn".to_string(),
            max_tokens: None,
            optional,
        };
        let recipe = |fragment: &str, docs: Vec<InputDocSpec>, total: usize, output: usize, temperature: f64| Recipe {
            name: name.to_string(),
            prompt_fragments: vec![fragment.to_string()],
            input_docs: docs,
            token_budget: TokenBudget {
                total,
                output,
                buffer: 200,
            },
            trimming_strategy: Some(TrimmingStrategy::default()),
            llm_params: LlmParams {
                temperature,
                max_tokens: output as u32,
            },
        };

        match name {
            "reflection" => Some(recipe("reflection", vec![doc("context.md", false)], 6000, 500, 0.4)),
            "planner" => Some(recipe(
                "planner",
                vec![doc("context.md", false), doc("retry_context.json", true)],
                12000,
                1500,
                0.6,
            )),
            "coordinator" => Some(recipe(
                "coordinator",
                vec![doc("context.md", false), doc("toolresults.md", true)],
                12000,
                1000,
                0.6,
            )),
            "executor" => Some(recipe(
                "executor",
                vec![doc("context.md", false), doc("toolresults.md", true)],
                12000,
                1000,
                0.6,
            )),
            "synthesizer" => Some(recipe(
                "synthesizer",
                vec![doc("context.md", false), doc("toolresults.md", true)],
                16000,
                2500,
                0.7,
            )),
            "validator" => Some(recipe(
                "validator",
                vec![doc("context.md", false), doc("toolresults.md", true)],
                12000,
                1200,
                0.4,
            )),
            "revision" => Some(recipe("revision", vec![doc("context.md", false)], 12000, 2000, 0.7)),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), PackError> {
        if self.token_budget.total == 0 {
            return Err(PackError::Configuration(format!(
                "Recipe {} has zero total budget",
                self.name
            )));
        }
        if self.token_budget.output + self.token_budget.buffer >= self.token_budget.total {
            return Err(PackError::Configuration(format!(
                "Recipe {} reserves more than its total budget",
                self.name
            )));
        }
        for doc in &self.input_docs {
            doc.resolved_path_type()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: synthesis
prompt_fragments:
  - synthesizer
input_docs:
  - path: context.md
    path_type: turn
    max_tokens: 4000
  - path: toolresults.md
    optional: true
token_budget:
  total: 12000
  output: 2000
  buffer: 500
trimming_strategy:
  method: truncate_end
  priority: [input_docs]
llm_params:
  temperature: 0.7
  max_tokens: 2000
"#;

    #[test]
    fn test_parse_sample_recipe() {
        let recipe: Recipe = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(recipe.name, "synthesis");
        assert_eq!(recipe.prompt_fragments, vec!["synthesizer"]);
        assert_eq!(recipe.input_docs.len(), 2);
        assert_eq!(recipe.input_docs[0].max_tokens, Some(4000));
        assert!(recipe.input_docs[1].optional);
        assert_eq!(recipe.token_budget.total, 12000);
        assert_eq!(recipe.trimming_strategy.unwrap().method, TrimMethod::TruncateEnd);
    }

    #[test]
    fn test_defaults() {
        let recipe: Recipe = serde_yaml::from_str(
            "name: minimal\nprompt_fragments: [planner]\ntoken_budget:\n  total: 1000\n  output: 200\n",
        )
        .unwrap();
        assert!(recipe.input_docs.is_empty());
        assert_eq!(recipe.input_docs.len(), 0);
        assert_eq!(recipe.llm_params.temperature, 0.6);
        assert!(recipe.trimming_strategy.is_none());
    }

    #[test]
    fn test_load_missing_recipe_is_configuration_error() {
        let result = Recipe::load("/nonexistent/recipe.yml");
        assert!(matches!(result, Err(PackError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_overcommitted_budget() {
        let result: Result<Recipe, _> = serde_yaml::from_str(
            "name: bad\nprompt_fragments: []\ntoken_budget:\n  total: 100\n  output: 90\n  buffer: 20\n",
        )
        .map_err(PackError::Yaml)
        .and_then(|r: Recipe| r.validate().map(|_| r));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_path_type() {
        let yaml = "name: bad\nprompt_fragments: []\ninput_docs:\n  - path: x.md\n    path_type: bogus\ntoken_budget:\n  total: 1000\n  output: 100\n";
        let recipe: Recipe = serde_yaml::from_str(yaml).unwrap();
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_builtin_recipes_validate() {
        for name in [
            "reflection",
            "planner",
            "coordinator",
            "executor",
            "synthesizer",
            "validator",
            "revision",
        ] {
            let recipe = Recipe::builtin(name).unwrap();
            recipe.validate().unwrap();
            assert!(recipe.input_docs.iter().any(|d| d.path == "context.md"));
        }
        assert!(Recipe::builtin("unknown").is_none());
    }

    #[test]
    fn test_load_or_builtin_prefers_disk() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join("planner.yml"),
            "name: planner-custom\nprompt_fragments: [planner]\ntoken_budget:\n  total: 5000\n  output: 800\n",
        )
        .unwrap();

        let recipe = Recipe::load_or_builtin(temp.path(), "planner").unwrap();
        assert_eq!(recipe.name, "planner-custom");

        let fallback = Recipe::load_or_builtin(temp.path(), "validator").unwrap();
        assert_eq!(fallback.name, "validator");
    }

    #[test]
    fn test_load_named() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join("planner.yml"),
            "name: planner\nprompt_fragments: [planner]\ntoken_budget:\n  total: 8000\n  output: 1500\n",
        )
        .unwrap();

        let recipe = Recipe::load_named(temp.path(), "planner").unwrap();
        assert_eq!(recipe.name, "planner");
    }
}
