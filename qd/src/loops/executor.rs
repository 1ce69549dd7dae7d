//! Executor loop - command-level iterations between planner and coordinator

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use contextdoc::ContextDocument;
use turnstore::TurnDirectory;

use crate::extension::CreateToolRequest;
use crate::llm::Role;
use crate::planning::extract_json;
use crate::workflow::Workflow;

use super::coordinator::Coordinator;
use super::guards::{looks_like_search, CommandLedger};
use super::services::LoopServices;

const PHASE: &str = "phase4_executor";

/// What the executor LLM asked for this iteration
#[derive(Debug)]
enum Action {
    Command { command: String, workflow_hint: Option<String> },
    Analyze { analysis: String },
    Complete { reasoning: String },
    Blocked { reasoning: String },
    CreateWorkflow { workflow: Value, tool_specs: Value },
    CreateTool,
}

fn parse_action(response: &str) -> Option<Action> {
    let payload = extract_json(response)?;
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    match payload.get("action").and_then(Value::as_str)? {
        "COMMAND" => Some(Action::Command {
            command: text("command"),
            workflow_hint: payload.get("workflow_hint").and_then(Value::as_str).map(String::from),
        }),
        "ANALYZE" => Some(Action::Analyze {
            analysis: text("analysis"),
        }),
        "COMPLETE" => Some(Action::Complete {
            reasoning: text("reasoning"),
        }),
        "BLOCKED" => Some(Action::Blocked {
            reasoning: text("reasoning"),
        }),
        "CREATE_WORKFLOW" => Some(Action::CreateWorkflow {
            workflow: payload.get("workflow").cloned().unwrap_or(Value::Null),
            tool_specs: payload.get("tool_specs").cloned().unwrap_or(Value::Null),
        }),
        "CREATE_TOOL" => Some(Action::CreateTool),
        _ => None,
    }
}

/// Result of an executor run
#[derive(Debug)]
pub struct ExecutorOutcome {
    /// `complete` | `blocked`
    pub status: String,
    pub reason: String,
    pub iterations: u32,
    pub toolresults: String,
    pub ticket: String,
}

impl ExecutorOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }
}

/// Middle loop: issue commands, analyze, complete
pub struct ExecutorLoop<'a> {
    services: &'a LoopServices,
}

impl<'a> ExecutorLoop<'a> {
    pub fn new(services: &'a LoopServices) -> Self {
        Self { services }
    }

    pub async fn run(&self, doc: &mut ContextDocument, turn_dir: &TurnDirectory) -> ExecutorOutcome {
        let max_iterations = self.services.limits.max_executor_iterations;
        info!("[ExecutorLoop] Starting (max_iterations: {})", max_iterations);

        let mut ledger = CommandLedger::new();
        let mut iteration_log: Vec<String> = Vec::new();
        let mut toolresults = String::new();
        let mut research_calls = 0u32;
        let mut tool_failures = 0u32;
        let mut parse_failures = 0u32;
        let mut consecutive_commands = 0u32;
        let mut inject_analyze = false;
        let mut iteration = 0u32;

        let (status, reason) = loop {
            if iteration >= max_iterations {
                break ("complete", "max iterations reached".to_string());
            }
            iteration += 1;
            doc.update_execution_state(4, "Executor", Some(iteration), Some(max_iterations), None);

            let mut extra = String::from("Issue the next action for the current plan.");
            if inject_analyze {
                extra.push_str("\nYou have issued several commands in a row. You MUST respond with ANALYZE before any further COMMAND.");
            }

            let response = match self
                .services
                .llm_call("executor", Role::Mind, doc, turn_dir, PHASE, Some(&extra))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("[ExecutorLoop] LLM call failed: {}", e);
                    break ("blocked", format!("llm failure: {}", e));
                }
            };

            let Some(action) = parse_action(&response) else {
                parse_failures += 1;
                if parse_failures >= 2 {
                    break ("blocked", "executor responses unparseable".to_string());
                }
                continue;
            };

            match action {
                Action::Complete { reasoning } => {
                    info!("[ExecutorLoop] COMPLETE at iteration {}: {}", iteration, reasoning);
                    iteration_log.push(format!("**Action:** COMPLETE\n{}", reasoning));
                    break ("complete", reasoning);
                }
                Action::Blocked { reasoning } => {
                    warn!("[ExecutorLoop] BLOCKED at iteration {}: {}", iteration, reasoning);
                    iteration_log.push(format!("**Action:** BLOCKED\n{}", reasoning));
                    break ("blocked", reasoning);
                }
                Action::Analyze { analysis } => {
                    debug!("[ExecutorLoop] ANALYZE at iteration {}", iteration);
                    consecutive_commands = 0;
                    inject_analyze = false;
                    iteration_log.push(format!("**Action:** ANALYZE\n{}", analysis));
                    doc.append_to_section(4, &format!("**Analysis (iteration {}):** {}", iteration, analysis), "\n\n")
                        .ok();
                }
                Action::CreateTool => {
                    // Tools are created only inside CREATE_WORKFLOW
                    warn!("[ExecutorLoop] CREATE_TOOL requested at iteration {}", iteration);
                    iteration_log.push(
                        "**Action:** CREATE_TOOL (rejected: use CREATE_WORKFLOW with tool_specs)".to_string(),
                    );
                    doc.append_to_section(
                        4,
                        "**CREATE_TOOL rejected:** tools are created only as part of CREATE_WORKFLOW with tool_specs.",
                        "\n\n",
                    )
                    .ok();
                }
                Action::CreateWorkflow { workflow, tool_specs } => {
                    consecutive_commands = 0;
                    match self.create_workflow(&workflow, &tool_specs, turn_dir).await {
                        Ok(name) => {
                            iteration_log.push(format!("**Action:** CREATE_WORKFLOW -> {}", name));
                            doc.append_to_section(4, &format!("**Created workflow:** {}", name), "\n\n").ok();
                        }
                        Err(e) => {
                            warn!("[ExecutorLoop] CREATE_WORKFLOW failed: {}", e);
                            iteration_log.push(format!("**Action:** CREATE_WORKFLOW failed: {}", e));
                            break ("blocked", format!("workflow creation failed: {}", e));
                        }
                    }
                }
                Action::Command { command, workflow_hint } => {
                    consecutive_commands += 1;
                    if consecutive_commands > self.services.limits.consecutive_command_cap {
                        warn!("[ExecutorLoop] Consecutive command cap hit");
                        inject_analyze = true;
                        consecutive_commands = 0;
                        continue;
                    }

                    if !ledger.record(&command) {
                        iteration_log.push(format!("**Action:** COMMAND (duplicate, skipped): {}", command));
                        continue;
                    }

                    if looks_like_search(&command) {
                        research_calls += 1;
                        if research_calls > self.services.limits.max_research_calls {
                            iteration_log.push(format!("**Action:** COMMAND (research cap hit): {}", command));
                            doc.append_to_section(4, "**Research cap reached**, no further search commands.", "\n\n")
                                .ok();
                            continue;
                        }
                    }

                    iteration_log.push(format!("**Action:** COMMAND\n{}", command));
                    let success = self
                        .run_command(&command, workflow_hint.as_deref(), doc, turn_dir, &mut toolresults)
                        .await;

                    if !success {
                        tool_failures += 1;
                        if tool_failures >= 3 {
                            break ("blocked", "three tool failures".to_string());
                        }
                    }
                }
            }
        };

        doc.append_to_section(
            4,
            &format!(
                "**Executor finished:** {} after {} iterations ({})",
                status, iteration, reason
            ),
            "\n\n",
        )
        .ok();

        ExecutorOutcome {
            status: status.to_string(),
            reason,
            iterations: iteration,
            toolresults,
            ticket: iteration_log.join("\n\n"),
        }
    }

    /// Workflow-first command execution, coordinator as fallback
    async fn run_command(
        &self,
        command: &str,
        workflow_hint: Option<&str>,
        doc: &mut ContextDocument,
        turn_dir: &TurnDirectory,
        toolresults: &mut String,
    ) -> bool {
        // Try a direct workflow match first; a validator-corrected hint on
        // the document outranks the command text
        let hint = workflow_hint
            .map(String::from)
            .or_else(|| doc.workflow_hint.clone())
            .unwrap_or_else(|| command.to_string());
        if let Some(workflow) = self.services.workflows.resolve(&hint).await {
            debug!(workflow = %workflow.name, "ExecutorLoop::run_command: direct workflow match");
            self.services.metrics.record_tool_call(PHASE);
            let mut inputs = Map::new();
            inputs.insert("query".to_string(), Value::String(command.to_string()));
            let result = self.services.step_runner.run(&workflow, inputs, Some(doc), doc.mode).await;

            toolresults.push_str(&format!(
                "## {} (command)\n\nstatus: {}\n\n```json\n{}\n```\n\n",
                workflow.name,
                if result.success { "success" } else { "failed" },
                serde_json::to_string_pretty(&Value::Object(result.outputs.clone())).unwrap_or_default()
            ));

            let (claims, _rejected) = crate::tools::extract_claims(&Value::Object(result.outputs.clone()), &workflow.name);
            for claim in claims {
                doc.claims.add(claim).ok();
            }
            return result.success;
        }

        // Fall back to a coordinator run with the command as goal
        let outcome = Coordinator::new(self.services, command).run(doc, turn_dir).await;
        toolresults.push_str(&outcome.toolresults);
        outcome.is_done()
    }

    /// CREATE_WORKFLOW: every declared tool needs a spec; create each,
    /// validate, then register
    async fn create_workflow(&self, workflow: &Value, tool_specs: &Value, turn_dir: &TurnDirectory) -> eyre::Result<String> {
        let definition = Workflow::from_json(workflow)?;

        for tool_name in &definition.tools {
            if self.services.catalog.has_tool(tool_name).await {
                continue;
            }
            let spec = tool_specs
                .get(tool_name)
                .ok_or_else(|| eyre::eyre!("missing tool_specs entry for {}", tool_name))?;

            let request = CreateToolRequest {
                workflow: definition.name.clone(),
                tool_name: tool_name.clone(),
                spec_markdown: spec
                    .get("spec")
                    .and_then(Value::as_str)
                    .ok_or_else(|| eyre::eyre!("tool_specs[{}] missing spec", tool_name))?
                    .to_string(),
                impl_source: spec
                    .get("implementation")
                    .and_then(Value::as_str)
                    .ok_or_else(|| eyre::eyre!("tool_specs[{}] missing implementation", tool_name))?
                    .to_string(),
                test_source: spec.get("tests").and_then(Value::as_str).map(String::from),
                skip_tests: false,
            };
            let result = self.services.tool_creator.create(request, turn_dir).await;
            if !result.success {
                eyre::bail!(
                    "tool.create failed for {}: {}",
                    tool_name,
                    result.reason.unwrap_or_default()
                );
            }
        }

        // workflow.validate_tools: every declared tool must now resolve
        for tool_name in &definition.tools {
            if !self.services.catalog.has_tool(tool_name).await {
                eyre::bail!("tool {} still missing after creation", tool_name);
            }
        }

        let name = definition.name.clone();
        self.services.workflows.register(definition).await;
        info!("[ExecutorLoop] Registered workflow {}", name);
        Ok(name)
    }
}
