//! Pack assembly - load, allot, compress, trim, emit

use tracing::{debug, info, warn};

use turnstore::TurnDirectory;

use crate::prompts::PromptLoader;

use super::compress::{count_tokens, truncate_to_tokens, Compressor};
use super::error::PackError;
use super::recipe::{Recipe, TrimMethod, TrimmingStrategy};
use super::{CRITICAL_DOCS, MIN_DOC_BUDGET};

/// Whether an item is a prompt fragment or an input document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackItemKind {
    Prompt,
    InputDoc,
}

/// One item of an assembled pack
#[derive(Debug, Clone)]
pub struct PackItem {
    pub kind: PackItemKind,
    pub name: String,
    pub content: String,
    pub tokens: usize,
    pub trimmed: bool,
}

/// The concrete prompt built from a recipe for one LLM call
#[derive(Debug, Clone)]
pub struct DocPack {
    pub recipe_name: String,
    pub budget: usize,
    pub output_reserved: usize,
    pub items: Vec<PackItem>,
    pub trimming_log: Vec<String>,
}

impl DocPack {
    /// Total input tokens currently in the pack
    pub fn token_count(&self) -> usize {
        self.items.iter().map(|i| i.tokens).sum()
    }

    /// Budget left for input docs after prompts and the output reservation
    pub fn remaining_budget(&self) -> usize {
        self.budget
            .saturating_sub(self.token_count())
            .saturating_sub(self.output_reserved)
    }

    /// Emit the final prompt: prompts first, then each doc under a header
    pub fn as_prompt(&self) -> String {
        let mut out = String::new();
        for item in self.items.iter().filter(|i| i.kind == PackItemKind::Prompt) {
            out.push_str(&item.content);
            out.push('\n');
        }
        for item in self.items.iter().filter(|i| i.kind == PackItemKind::InputDoc) {
            out.push_str(&format!("\n---\n# {}\n\n", item.name));
            out.push_str(&item.content);
            out.push('\n');
        }
        out
    }
}

/// Builds packs from recipes
pub struct PackBuilder {
    compressor: Compressor,
}

impl PackBuilder {
    /// Builder with deterministic compression (no LLM path)
    pub fn deterministic() -> Self {
        Self {
            compressor: Compressor::deterministic(),
        }
    }

    pub fn new(compressor: Compressor) -> Self {
        Self { compressor }
    }

    /// Build a pack from a recipe against a turn directory
    ///
    /// Fails with `BudgetExceeded` if the prompt fragments alone exceed the
    /// budget, or if the assembled pack still exceeds it after trimming.
    /// Missing non-optional docs fail with `MissingDoc`.
    pub async fn build(
        &self,
        recipe: &Recipe,
        turn_dir: &TurnDirectory,
        prompts: &PromptLoader,
    ) -> Result<DocPack, PackError> {
        debug!(recipe = %recipe.name, budget = recipe.token_budget.total, "PackBuilder::build: called");

        let mut pack = DocPack {
            recipe_name: recipe.name.clone(),
            budget: recipe.token_budget.total,
            output_reserved: 0,
            items: Vec::new(),
            trimming_log: Vec::new(),
        };

        // 1. Prompt fragments are a fixed cost, non-negotiable
        for fragment in &recipe.prompt_fragments {
            let content = prompts
                .load(fragment)
                .map_err(|e| PackError::Configuration(e.to_string()))?;
            pack.items.push(PackItem {
                kind: PackItemKind::Prompt,
                name: fragment.clone(),
                tokens: count_tokens(&content),
                content,
                trimmed: false,
            });
        }
        if pack.token_count() > pack.budget {
            return Err(PackError::BudgetExceeded {
                used: pack.token_count(),
                budget: pack.budget,
                context: "prompt fragments alone".to_string(),
            });
        }

        // 2. Reserve output tokens
        pack.output_reserved = recipe.token_budget.output;

        // 3. Allocate per-doc budgets
        let input_budget = pack.remaining_budget().saturating_sub(recipe.token_budget.buffer);
        let doc_budgets = allocate_doc_budgets(recipe, input_budget);

        // 4. Load and compress each input doc
        for (spec, doc_budget) in recipe.input_docs.iter().zip(doc_budgets) {
            let path = turn_dir.doc_path(&spec.path, spec.resolved_path_type()?);
            if !path.exists() {
                if spec.optional {
                    pack.trimming_log.push(format!("Skipped optional doc: {}", spec.path));
                    debug!(doc = %spec.path, "PackBuilder::build: skipped optional doc");
                    continue;
                }
                return Err(PackError::MissingDoc {
                    name: spec.path.clone(),
                    path,
                });
            }

            let content = std::fs::read_to_string(&path)?;
            let critical = CRITICAL_DOCS.iter().any(|c| spec.path.ends_with(c));
            let (compressed, strategy) = self.compressor.compress(&content, doc_budget, critical).await;
            let tokens = count_tokens(&compressed);
            let trimmed = compressed.len() < content.len();
            if trimmed {
                pack.trimming_log
                    .push(format!("Compressed {} via {:?} to {} tokens", spec.path, strategy, tokens));
            }
            pack.items.push(PackItem {
                kind: PackItemKind::InputDoc,
                name: spec.path.clone(),
                content: compressed,
                tokens,
                trimmed,
            });
        }

        // 5. Emergency trim if still over
        let usable = pack.budget.saturating_sub(pack.output_reserved);
        if pack.token_count() > usable {
            let strategy = recipe.trimming_strategy.clone().unwrap_or_else(|| {
                warn!(recipe = %recipe.name, "No trimming strategy, using default truncate_end");
                TrimmingStrategy::default()
            });
            apply_emergency_trim(&mut pack, &strategy, usable);
        }

        if pack.token_count() > usable {
            return Err(PackError::BudgetExceeded {
                used: pack.token_count(),
                budget: usable,
                context: "after trimming".to_string(),
            });
        }

        info!(
            "[DocPack] Built {}: {}/{} tokens ({} items, {} trim entries)",
            pack.recipe_name,
            pack.token_count(),
            pack.budget,
            pack.items.len(),
            pack.trimming_log.len()
        );
        Ok(pack)
    }
}

/// Split the input budget across docs: explicit allotments first, the
/// remainder divided equally with a floor of 100 tokens per doc
fn allocate_doc_budgets(recipe: &Recipe, input_budget: usize) -> Vec<usize> {
    let explicit: usize = recipe.input_docs.iter().filter_map(|d| d.max_tokens).sum();
    let implicit_count = recipe.input_docs.iter().filter(|d| d.max_tokens.is_none()).count();
    let per_doc = if implicit_count > 0 {
        (input_budget.saturating_sub(explicit) / implicit_count).max(MIN_DOC_BUDGET)
    } else {
        0
    };

    recipe
        .input_docs
        .iter()
        .map(|d| d.max_tokens.unwrap_or(per_doc))
        .collect()
}

/// Trim input docs from the end, never cutting a doc past 50% per pass
fn apply_emergency_trim(pack: &mut DocPack, strategy: &TrimmingStrategy, target: usize) {
    if strategy.method != TrimMethod::TruncateEnd {
        // drop_oldest and summarize degrade to truncate_end at this stage
        debug!(?strategy.method, "apply_emergency_trim: degrading to truncate_end");
    }

    let mut excess = pack.token_count().saturating_sub(target);
    warn!("[DocPack] Emergency trim: {} tokens over budget", excess);

    for item in pack.items.iter_mut().rev() {
        if excess == 0 {
            break;
        }
        if item.kind != PackItemKind::InputDoc {
            continue;
        }
        let trim_amount = excess.min(item.tokens / 2);
        if trim_amount == 0 {
            continue;
        }
        let new_tokens = item.tokens - trim_amount;
        item.content = truncate_to_tokens(&item.content, new_tokens);
        let before = item.tokens;
        item.tokens = count_tokens(&item.content);
        item.trimmed = true;
        pack.trimming_log
            .push(format!("Emergency trim {}: {} -> {}", item.name, before, item.tokens));
        excess = excess.saturating_sub(before - item.tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::recipe::{InputDocSpec, LlmParams, TokenBudget};
    use turnstore::create_turn_directory;

    fn recipe_with(input_docs: Vec<InputDocSpec>, total: usize, output: usize) -> Recipe {
        Recipe {
            name: "test".to_string(),
            prompt_fragments: vec!["coordinator".to_string()],
            input_docs,
            token_budget: TokenBudget {
                total,
                output,
                buffer: 0,
            },
            trimming_strategy: None,
            llm_params: LlmParams::default(),
        }
    }

    fn doc_spec(path: &str, max_tokens: Option<usize>, optional: bool) -> InputDocSpec {
        InputDocSpec {
            path: path.to_string(),
            path_type: "turn".to_string(),
            max_tokens,
            optional,
        }
    }

    fn setup_turn() -> (tempfile::TempDir, TurnDirectory) {
        let temp = tempfile::tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "trace", "sess", "chat").unwrap();
        (temp, turn)
    }

    #[tokio::test]
    async fn test_prompts_alone_over_budget_fails() {
        let (_temp, turn) = setup_turn();
        let recipe = recipe_with(vec![], 10, 2);
        let builder = PackBuilder::deterministic();

        let result = builder.build(&recipe, &turn, &PromptLoader::embedded_only()).await;
        assert!(matches!(result, Err(PackError::BudgetExceeded { .. })));
    }

    #[tokio::test]
    async fn test_missing_required_doc_fails() {
        let (_temp, turn) = setup_turn();
        let recipe = recipe_with(vec![doc_spec("absent.md", None, false)], 4000, 500);
        let builder = PackBuilder::deterministic();

        let result = builder.build(&recipe, &turn, &PromptLoader::embedded_only()).await;
        assert!(matches!(result, Err(PackError::MissingDoc { .. })));
    }

    #[tokio::test]
    async fn test_missing_optional_doc_skipped_silently() {
        let (_temp, turn) = setup_turn();
        let recipe = recipe_with(vec![doc_spec("absent.md", None, true)], 4000, 500);
        let builder = PackBuilder::deterministic();

        let pack = builder.build(&recipe, &turn, &PromptLoader::embedded_only()).await.unwrap();
        assert!(pack.items.iter().all(|i| i.kind == PackItemKind::Prompt));
        assert!(pack.trimming_log.iter().any(|l| l.contains("absent.md")));
    }

    #[tokio::test]
    async fn test_doc_compressed_to_allotment() {
        let (_temp, turn) = setup_turn();
        std::fs::write(turn.path.join("big.md"), "filler data. ".repeat(2000)).unwrap();
        let recipe = recipe_with(vec![doc_spec("big.md", Some(200), false)], 4000, 500);
        let builder = PackBuilder::deterministic();

        let pack = builder.build(&recipe, &turn, &PromptLoader::embedded_only()).await.unwrap();
        let doc = pack.items.iter().find(|i| i.name == "big.md").unwrap();
        assert!(doc.tokens <= 201);
        assert!(doc.trimmed);
    }

    #[tokio::test]
    async fn test_pack_fits_total_budget() {
        let (_temp, turn) = setup_turn();
        std::fs::write(turn.path.join("a.md"), "alpha data. ".repeat(400)).unwrap();
        std::fs::write(turn.path.join("b.md"), "beta data. ".repeat(400)).unwrap();
        let recipe = recipe_with(
            vec![doc_spec("a.md", None, false), doc_spec("b.md", None, false)],
            1500,
            300,
        );
        let builder = PackBuilder::deterministic();

        let pack = builder.build(&recipe, &turn, &PromptLoader::embedded_only()).await.unwrap();
        assert!(pack.token_count() + pack.output_reserved <= pack.budget + 2);
    }

    #[tokio::test]
    async fn test_identical_input_builds_identical_packs() {
        let (_temp, turn) = setup_turn();
        std::fs::write(turn.path.join("a.md"), "alpha data. ".repeat(300)).unwrap();
        let recipe = recipe_with(vec![doc_spec("a.md", Some(150), false)], 3000, 500);
        let builder = PackBuilder::deterministic();
        let prompts = PromptLoader::embedded_only();

        let pack1 = builder.build(&recipe, &turn, &prompts).await.unwrap();
        let pack2 = builder.build(&recipe, &turn, &prompts).await.unwrap();
        assert_eq!(pack1.as_prompt(), pack2.as_prompt());
        assert_eq!(pack1.token_count(), pack2.token_count());
    }

    #[tokio::test]
    async fn test_as_prompt_layout() {
        let (_temp, turn) = setup_turn();
        std::fs::write(turn.path.join("notes.md"), "the notes body").unwrap();
        let recipe = recipe_with(vec![doc_spec("notes.md", None, false)], 4000, 500);
        let builder = PackBuilder::deterministic();

        let pack = builder.build(&recipe, &turn, &PromptLoader::embedded_only()).await.unwrap();
        let prompt = pack.as_prompt();
        assert!(prompt.contains("\n---\n# notes.md\n\n"));
        let header = prompt.find("# notes.md").unwrap();
        let body = prompt.find("the notes body").unwrap();
        assert!(header < body);
    }

    #[test]
    fn test_allocate_doc_budgets_explicit_then_split() {
        let recipe = recipe_with(
            vec![
                doc_spec("a.md", Some(500), false),
                doc_spec("b.md", None, false),
                doc_spec("c.md", None, false),
            ],
            10_000,
            0,
        );
        let budgets = allocate_doc_budgets(&recipe, 2500);
        assert_eq!(budgets, vec![500, 1000, 1000]);
    }

    #[test]
    fn test_allocate_doc_budgets_floor() {
        let recipe = recipe_with(vec![doc_spec("a.md", None, false), doc_spec("b.md", None, false)], 10_000, 0);
        let budgets = allocate_doc_budgets(&recipe, 50);
        assert_eq!(budgets, vec![100, 100]);
    }
}
