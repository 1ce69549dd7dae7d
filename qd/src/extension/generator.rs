//! LLM-backed tool generation
//!
//! Given a missing tool name and the goal it must serve, the generator
//! asks the Voice role for a spec, an implementation, and tests, parsed
//! from a single JSON payload.

use std::sync::Arc;

use eyre::{eyre, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::llm::{CompletionRequest, LlmClient, Role};
use crate::planning::extract_json;
use crate::prompts::PromptLoader;

/// Artifacts generated for one missing tool
#[derive(Debug, Clone)]
pub struct GeneratedTool {
    pub tool_name: String,
    pub spec_markdown: String,
    pub impl_source: String,
    pub test_source: Option<String>,
}

/// Generate spec, implementation, and tests for a missing tool
pub async fn generate_tool(
    llm: &Arc<dyn LlmClient>,
    prompts: &PromptLoader,
    tool_name: &str,
    goal: &str,
) -> Result<GeneratedTool> {
    debug!(%tool_name, "generate_tool: called");

    let fragment = prompts.load("tool_generator")?;
    let prompt = format!(
        "{}\n\nTool name: {}\nGoal it must serve: {}\n",
        fragment, tool_name, goal
    );

    let response = llm
        .complete(CompletionRequest::new(prompt, Role::Voice, 8192))
        .await
        .map_err(|e| eyre!("tool generation call failed: {}", e))?;

    let payload = extract_json(&response.content).ok_or_else(|| eyre!("tool generator returned no JSON"))?;

    let spec_markdown = payload
        .get("spec")
        .and_then(Value::as_str)
        .ok_or_else(|| eyre!("tool generator payload missing spec"))?
        .to_string();
    let impl_source = payload
        .get("implementation")
        .and_then(Value::as_str)
        .ok_or_else(|| eyre!("tool generator payload missing implementation"))?
        .to_string();
    let test_source = payload.get("tests").and_then(Value::as_str).map(String::from);

    info!("[Generator] Generated artifacts for {}", tool_name);
    Ok(GeneratedTool {
        tool_name: tool_name.to_string(),
        spec_markdown,
        impl_source,
        test_source,
    })
}
