//! Step runner - executes a workflow's step DAG against the tool catalog

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use contextdoc::{ContextDocument, Mode};

use crate::tools::{resolve_tool_uri, ToolCatalog};

use super::definition::Workflow;
use super::error::WorkflowError;
use super::interpolate::{evaluate_condition, evaluate_criterion, interpolate_args};

/// Result of one workflow execution
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub success: bool,
    pub workflow_name: String,
    pub outputs: Map<String, Value>,
    pub steps_executed: Vec<String>,
    pub elapsed_seconds: f64,
    pub error: Option<String>,
    pub fallback_used: Option<String>,
    pub warnings: Vec<String>,
}

/// Executes workflows step by step
pub struct StepRunner {
    catalog: Arc<ToolCatalog>,
}

impl StepRunner {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }

    /// Run a workflow with caller-supplied inputs
    ///
    /// 1. Resolve inputs (explicit > `from` source > default > context)
    /// 2. Run steps in order, honoring conditions
    /// 3. Interpolate args from inputs plus rolling step outputs
    /// 4. Evaluate success criteria; on failure consult the fallback
    pub async fn run(
        &self,
        workflow: &Workflow,
        inputs: Map<String, Value>,
        context_doc: Option<&ContextDocument>,
        mode: Mode,
    ) -> WorkflowResult {
        let start = Instant::now();
        let mut steps_executed: Vec<String> = Vec::new();
        let mut step_outputs: Map<String, Value> = Map::new();
        let warnings: Vec<String> = Vec::new();

        info!("[StepRunner] Starting workflow: {}", workflow.name);
        let resolved_inputs = self.resolve_inputs(workflow, inputs, context_doc);

        for step in &workflow.steps {
            let mut context = resolved_inputs.clone();
            context.extend(step_outputs.clone());

            if let Some(condition) = &step.condition {
                if !evaluate_condition(condition, &context) {
                    info!("[StepRunner] Skipping step {} (condition not met)", step.name);
                    continue;
                }
            }

            info!("[StepRunner] Executing step: {}", step.name);
            let args = interpolate_args(&step.args, &context);
            let tool_name = resolve_tool_uri(&step.tool);
            debug!(step = %step.name, %tool_name, "StepRunner::run: dispatching");

            let result = self.catalog.execute(tool_name, args, Some(mode)).await;

            if result.get("status").and_then(Value::as_str) == Some("error") {
                let reason = result
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string();
                warn!("[StepRunner] Step {} failed: {}", step.name, reason);
                let error = WorkflowError::StepFailed {
                    step: step.name.clone(),
                    reason,
                };
                return self.handle_failure(
                    workflow,
                    step_outputs,
                    steps_executed,
                    start.elapsed().as_secs_f64(),
                    warnings,
                    Some(error.to_string()),
                );
            }

            // Collect declared outputs, then any undeclared non-status keys
            if let Value::Object(result_map) = &result {
                for output_name in &step.outputs {
                    if let Some(value) = result_map.get(output_name) {
                        step_outputs.insert(output_name.clone(), value.clone());
                    }
                }
                for (key, value) in result_map {
                    if key != "status" && !step_outputs.contains_key(key) {
                        step_outputs.insert(key.clone(), value.clone());
                    }
                }
            }

            steps_executed.push(step.name.clone());
        }

        let elapsed = start.elapsed().as_secs_f64();
        let success = workflow
            .success_criteria
            .iter()
            .all(|criterion| {
                let passed = evaluate_criterion(criterion, &step_outputs);
                if !passed {
                    debug!(%criterion, "StepRunner::run: criterion failed");
                }
                passed
            });

        if success {
            info!("[StepRunner] Workflow {} completed in {:.2}s", workflow.name, elapsed);
            return WorkflowResult {
                success: true,
                workflow_name: workflow.name.clone(),
                outputs: step_outputs,
                steps_executed,
                elapsed_seconds: elapsed,
                error: None,
                fallback_used: None,
                warnings,
            };
        }

        warn!("[StepRunner] Workflow {} success criteria not met", workflow.name);
        self.handle_failure(workflow, step_outputs, steps_executed, elapsed, warnings, None)
    }

    /// Resolve workflow inputs by precedence
    fn resolve_inputs(
        &self,
        workflow: &Workflow,
        inputs: Map<String, Value>,
        context_doc: Option<&ContextDocument>,
    ) -> Map<String, Value> {
        let mut resolved = Map::new();

        for (name, spec) in &workflow.inputs {
            if let Some(value) = inputs.get(name) {
                resolved.insert(name.clone(), value.clone());
            } else if let Some(from) = &spec.from {
                resolved.insert(
                    name.clone(),
                    resolve_from_source(from, context_doc).unwrap_or(Value::Null),
                );
            } else if let Some(default) = &spec.default {
                resolved.insert(name.clone(), default.clone());
            } else if spec.required {
                // Required but unset: last resort is the raw query
                let fallback = context_doc.map(|doc| doc.query.clone()).unwrap_or_default();
                resolved.insert(name.clone(), Value::String(fallback));
            }
        }

        // Callers may pass extras the workflow did not declare
        for (name, value) in inputs {
            resolved.entry(name).or_insert(value);
        }

        resolved
    }

    fn handle_failure(
        &self,
        workflow: &Workflow,
        mut outputs: Map<String, Value>,
        steps_executed: Vec<String>,
        elapsed: f64,
        mut warnings: Vec<String>,
        error: Option<String>,
    ) -> WorkflowResult {
        let Some(fallback) = &workflow.fallback else {
            return WorkflowResult {
                success: false,
                workflow_name: workflow.name.clone(),
                outputs,
                steps_executed,
                elapsed_seconds: elapsed,
                error: error.or_else(|| Some("Success criteria not met".to_string())),
                fallback_used: None,
                warnings,
            };
        };

        if let Some(fallback_workflow) = &fallback.workflow {
            // Execution of the fallback is the caller's decision
            info!("[StepRunner] Fallback workflow available: {}", fallback_workflow);
            warnings.push(format!("Fallback: {}", fallback.message));
            return WorkflowResult {
                success: false,
                workflow_name: workflow.name.clone(),
                outputs,
                steps_executed,
                elapsed_seconds: elapsed,
                error,
                fallback_used: Some(fallback_workflow.clone()),
                warnings,
            };
        }

        outputs.insert("fallback_message".to_string(), Value::String(fallback.message.clone()));
        WorkflowResult {
            success: false,
            workflow_name: workflow.name.clone(),
            outputs,
            steps_executed,
            elapsed_seconds: elapsed,
            error: error.or_else(|| Some(fallback.message.clone())),
            fallback_used: None,
            warnings,
        }
    }
}

/// Resolve a `from:` source against the context document
fn resolve_from_source(from: &str, context_doc: Option<&ContextDocument>) -> Option<Value> {
    let doc = context_doc?;

    if from == "original_query" {
        return Some(Value::String(doc.query.clone()));
    }
    if let Some(section) = from.strip_prefix("section_") {
        let number: u8 = section.split('_').next()?.parse().ok()?;
        return Some(Value::String(doc.get_section(number).unwrap_or("").to_string()));
    }
    if let Some(field) = from.strip_prefix("content_reference.") {
        return doc.content_reference_field(field).map(Value::String);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{EchoTool, FailingTool, FixedTool};
    use crate::tools::{ToolError, ToolMode};
    use crate::workflow::definition::testing::COMMERCE_WORKFLOW;
    use contextdoc::QueryAnalysis;
    use serde_json::json;
    use std::path::Path;

    fn commerce() -> Workflow {
        Workflow::parse(COMMERCE_WORKFLOW, Path::new("commerce_search.md")).unwrap()
    }

    fn doc() -> ContextDocument {
        let mut doc = ContextDocument::new("cheapest Arduino Nano under $10", "s", 1, Mode::Chat, "t");
        doc.set_query_analysis(QueryAnalysis {
            action_needed: "find".to_string(),
            data_requirements: vec![],
            user_purpose: "buy".to_string(),
            content_reference: Some(json!({"source_url": "https://ref.example"})),
            prior_context: String::new(),
        });
        doc
    }

    async fn catalog_with_research(result: Value) -> Arc<ToolCatalog> {
        let catalog = ToolCatalog::new();
        catalog
            .register("internet.research", Arc::new(FixedTool(result)), ToolMode::Any, "", false)
            .await;
        Arc::new(catalog)
    }

    #[tokio::test]
    async fn test_successful_run_collects_outputs() {
        let catalog = catalog_with_research(json!({
            "status": "success",
            "findings": [{"title": "Nano", "price": 8.99, "url": "https://shop.example"}],
            "sources": ["https://shop.example"]
        }))
        .await;
        let runner = StepRunner::new(catalog);
        let doc = doc();

        let result = runner.run(&commerce(), Map::new(), Some(&doc), Mode::Chat).await;

        assert!(result.success);
        assert_eq!(result.steps_executed, vec!["research"]);
        assert_eq!(result.outputs["findings"].as_array().unwrap().len(), 1);
        // Undeclared non-status keys are collected too
        assert!(result.outputs.contains_key("sources"));
    }

    #[tokio::test]
    async fn test_inputs_resolved_from_original_query() {
        let catalog = Arc::new(ToolCatalog::new());
        catalog
            .register("internet.research", Arc::new(EchoTool), ToolMode::Any, "", false)
            .await;
        let runner = StepRunner::new(catalog);
        let doc = doc();

        let result = runner.run(&commerce(), Map::new(), Some(&doc), Mode::Chat).await;

        // EchoTool returns args under "echo"; success criteria fail but
        // the interpolated query must be the original query
        let echoed = &result.outputs["echo"];
        assert_eq!(echoed["query"], "cheapest Arduino Nano under $10");
        assert_eq!(echoed["limit"], 5);
    }

    #[tokio::test]
    async fn test_explicit_input_beats_from_source() {
        let catalog = Arc::new(ToolCatalog::new());
        catalog
            .register("internet.research", Arc::new(EchoTool), ToolMode::Any, "", false)
            .await;
        let runner = StepRunner::new(catalog);
        let doc = doc();

        let mut inputs = Map::new();
        inputs.insert("query".to_string(), json!("explicit query"));
        let result = runner.run(&commerce(), inputs, Some(&doc), Mode::Chat).await;

        assert_eq!(result.outputs["echo"]["query"], "explicit query");
    }

    #[tokio::test]
    async fn test_step_error_surfaces_fallback() {
        let catalog = Arc::new(ToolCatalog::new());
        catalog
            .register(
                "internet.research",
                Arc::new(FailingTool(ToolError::HandlerFailed("down".into()))),
                ToolMode::Any,
                "",
                false,
            )
            .await;
        let runner = StepRunner::new(catalog);

        let result = runner.run(&commerce(), Map::new(), None, Mode::Chat).await;

        assert!(!result.success);
        assert_eq!(result.fallback_used.as_deref(), Some("generic_search"));
        assert!(result.error.unwrap().contains("research"));
    }

    #[tokio::test]
    async fn test_criteria_failure_without_fallback_workflow() {
        let mut workflow = commerce();
        workflow.fallback = Some(crate::workflow::definition::Fallback {
            workflow: None,
            message: "Nothing found.".to_string(),
        });
        let catalog = catalog_with_research(json!({"status": "success", "findings": []})).await;
        let runner = StepRunner::new(catalog);

        let result = runner.run(&workflow, Map::new(), None, Mode::Chat).await;

        assert!(!result.success);
        assert!(result.fallback_used.is_none());
        assert_eq!(result.outputs["fallback_message"], "Nothing found.");
    }

    #[tokio::test]
    async fn test_condition_skips_step() {
        let mut workflow = commerce();
        workflow.steps[0].condition = Some("{{can_search}}".to_string());
        workflow.success_criteria.clear();
        let catalog = catalog_with_research(json!({"status": "success", "findings": [1]})).await;
        let runner = StepRunner::new(catalog);

        let result = runner.run(&workflow, Map::new(), None, Mode::Chat).await;

        assert!(result.success);
        assert!(result.steps_executed.is_empty());
    }

    #[tokio::test]
    async fn test_content_reference_source() {
        let mut workflow = commerce();
        workflow.inputs.insert(
            "ref_url".to_string(),
            crate::workflow::definition::InputSpec {
                from: Some("content_reference.source_url".to_string()),
                ..Default::default()
            },
        );
        workflow.steps[0].args = json!({"url": "{{ref_url}}"});
        workflow.success_criteria.clear();

        let catalog = Arc::new(ToolCatalog::new());
        catalog
            .register("internet.research", Arc::new(EchoTool), ToolMode::Any, "", false)
            .await;
        let runner = StepRunner::new(catalog);
        let doc = doc();

        let result = runner.run(&workflow, Map::new(), Some(&doc), Mode::Chat).await;
        assert_eq!(result.outputs["echo"]["url"], "https://ref.example");
    }
}
