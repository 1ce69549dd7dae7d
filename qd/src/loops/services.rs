//! Shared service handles for the control loops

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Context, Result};
use tracing::debug;

use contextdoc::ContextDocument;
use turnstore::{PathType, TurnDirectory};

use crate::config::LimitsConfig;
use crate::events::EventSink;
use crate::extension::ToolCreator;
use crate::llm::{CompletionRequest, LlmClient, Role};
use crate::pack::{PackBuilder, Recipe};
use crate::phases::PhaseMetrics;
use crate::prompts::PromptLoader;
use crate::tools::{ApprovalBroker, ToolCatalog, ToolExecutor};
use crate::workflow::{StepRunner, WorkflowRegistry};

/// Everything the loops need, bundled once per request
pub struct LoopServices {
    pub llm: Arc<dyn LlmClient>,
    pub prompts: Arc<PromptLoader>,
    pub pack_builder: Arc<PackBuilder>,
    pub recipes_dir: PathBuf,
    pub catalog: Arc<ToolCatalog>,
    pub workflows: Arc<WorkflowRegistry>,
    pub step_runner: Arc<StepRunner>,
    pub tool_executor: Arc<ToolExecutor>,
    pub tool_creator: Arc<ToolCreator>,
    pub broker: Arc<ApprovalBroker>,
    pub events: Arc<dyn EventSink>,
    pub metrics: Arc<PhaseMetrics>,
    pub limits: LimitsConfig,
}

impl LoopServices {
    /// Serialize the context document, build the role's pack, call the LLM
    ///
    /// The invariant behind every LLM call: a freshly written `context.md`
    /// and a pack within its recipe budget. `extra` is appended after the
    /// pack body (goals, injected requirements).
    pub async fn llm_call(
        &self,
        recipe_name: &str,
        role: Role,
        doc: &ContextDocument,
        turn_dir: &TurnDirectory,
        phase: &str,
        extra: Option<&str>,
    ) -> Result<String> {
        write_context(doc, turn_dir)?;

        let recipe = Recipe::load_or_builtin(&self.recipes_dir, recipe_name)?;
        let pack = self
            .pack_builder
            .build(&recipe, turn_dir, &self.prompts)
            .await
            .context(format!("Failed to build pack for {}", recipe_name))?;

        let mut prompt = pack.as_prompt();
        if let Some(extra) = extra {
            prompt.push_str("\n---\n");
            prompt.push_str(extra);
            prompt.push('\n');
        }

        debug!(recipe = %recipe_name, %role, prompt_len = prompt.len(), "LoopServices::llm_call: dispatching");
        let request = CompletionRequest::new(prompt, role, recipe.llm_params.max_tokens)
            .with_temperature(recipe.llm_params.temperature);
        let response = self.llm.complete(request).await?;
        self.metrics.record_tokens(phase, response.total_tokens());
        Ok(response.content)
    }
}

/// Write `context.md` into the turn directory
pub fn write_context(doc: &ContextDocument, turn_dir: &TurnDirectory) -> Result<()> {
    let path = turn_dir.doc_path("context.md", PathType::Turn);
    std::fs::write(&path, doc.get_markdown()).context("Failed to write context.md")?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{Config, ToolServerConfig};
    use crate::events::NullSink;
    use crate::llm::MockLlmClient;
    use crate::tools::{PermissionGate, ToolServerClient};

    /// Build LoopServices around a scripted LLM and an empty catalog
    pub fn services_with_llm(responses: Vec<String>, recipes_dir: PathBuf) -> LoopServices {
        services_with_mock(Arc::new(MockLlmClient::new(responses)), recipes_dir)
    }

    /// Same, but keeps the mock handle so tests can inspect prompts
    pub fn services_with_mock(mock: Arc<MockLlmClient>, recipes_dir: PathBuf) -> LoopServices {
        let config = Config::default();
        let llm: Arc<dyn LlmClient> = mock;
        let catalog = Arc::new(ToolCatalog::new());
        let server = Arc::new(ToolServerClient::from_config(&ToolServerConfig::default()).unwrap());
        let broker = Arc::new(ApprovalBroker::new());

        LoopServices {
            llm,
            prompts: Arc::new(PromptLoader::embedded_only()),
            pack_builder: Arc::new(PackBuilder::deterministic()),
            recipes_dir,
            catalog: catalog.clone(),
            workflows: Arc::new(WorkflowRegistry::new()),
            step_runner: Arc::new(StepRunner::new(catalog.clone())),
            tool_executor: Arc::new(ToolExecutor::new(
                catalog.clone(),
                PermissionGate::permissive(),
                broker.clone(),
            )),
            tool_creator: Arc::new(ToolCreator::new("bundles", catalog, server)),
            broker,
            events: Arc::new(NullSink),
            metrics: Arc::new(PhaseMetrics::new()),
            limits: config.limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextdoc::Mode;
    use turnstore::create_turn_directory;

    #[tokio::test]
    async fn test_llm_call_writes_context_first() {
        let temp = tempfile::tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "t", "s", "chat").unwrap();
        let services = testing::services_with_llm(vec!["ok".to_string()], temp.path().join("recipes"));

        let doc = ContextDocument::new("test query", "s", 1, Mode::Chat, "t");
        let response = services
            .llm_call("coordinator", Role::Mind, &doc, &turn, "phase3_planning", Some("Goal: test"))
            .await
            .unwrap();

        assert_eq!(response, "ok");
        let context = std::fs::read_to_string(turn.path.join("context.md")).unwrap();
        assert!(context.contains("test query"));
        assert!(services.metrics.tokens_by_phase().contains_key("phase3_planning"));
    }
}
