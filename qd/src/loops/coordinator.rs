//! Coordinator - one-step workflow decisions until DONE or BLOCKED

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use contextdoc::ContextDocument;
use turnstore::TurnDirectory;

use crate::llm::Role;
use crate::planning::extract_json;
use crate::tools::extract_claims;

use super::guards::{CircularCallDetector, ResearchGuard};
use super::services::LoopServices;

const PHASE: &str = "phase4_coordinator";

/// What the coordinator LLM asked for this step
#[derive(Debug)]
enum Action {
    WorkflowCall {
        workflow: String,
        args: Map<String, Value>,
        rationale: String,
    },
    Done {
        reason: String,
    },
    Blocked {
        reason: String,
    },
}

fn parse_action(response: &str) -> Option<Action> {
    let payload = extract_json(response)?;
    match payload.get("action").and_then(Value::as_str)? {
        "WORKFLOW_CALL" => Some(Action::WorkflowCall {
            workflow: payload.get("workflow_selected").and_then(Value::as_str)?.to_string(),
            args: payload
                .get("workflow_args")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            rationale: payload
                .get("rationale")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "DONE" => Some(Action::Done {
            reason: payload
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("done")
                .to_string(),
        }),
        "BLOCKED" => Some(Action::Blocked {
            reason: payload
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("blocked")
                .to_string(),
        }),
        _ => None,
    }
}

/// Result of a coordinator run
#[derive(Debug)]
pub struct CoordinatorOutcome {
    /// `done` | `blocked`
    pub status: String,
    pub termination_reason: String,
    pub iterations: u32,
    pub tool_calls: u32,

    /// Aggregated workflow results for `toolresults.md`
    pub toolresults: String,

    /// Step log for the ticket
    pub ticket: String,
}

impl CoordinatorOutcome {
    pub fn is_done(&self) -> bool {
        self.status == "done"
    }
}

/// The innermost loop: pick one workflow per step until the goal is met
pub struct Coordinator<'a> {
    services: &'a LoopServices,
    goal: String,
}

impl<'a> Coordinator<'a> {
    pub fn new(services: &'a LoopServices, goal: impl Into<String>) -> Self {
        Self {
            services,
            goal: goal.into(),
        }
    }

    pub async fn run(&self, doc: &mut ContextDocument, turn_dir: &TurnDirectory) -> CoordinatorOutcome {
        let max_steps = self.services.limits.max_coordinator_steps;
        info!("[Coordinator] Starting (goal: {}, max_steps: {})", self.goal, max_steps);

        let mut research_guard = ResearchGuard::new();
        let mut circular = CircularCallDetector::new();
        let mut step_log: Vec<String> = Vec::new();
        let mut toolresults = String::new();
        let mut tool_calls = 0u32;
        let mut failures = 0u32;
        let mut parse_failures = 0u32;
        let mut iteration = 0u32;

        let (status, termination_reason) = loop {
            if iteration >= max_steps {
                // An empty call plan with claims in hand is completion,
                // not a failure
                if doc.claims.is_empty() && tool_calls == 0 {
                    break ("blocked", "max steps reached with no claims".to_string());
                }
                break ("done", "max steps reached".to_string());
            }
            iteration += 1;
            doc.update_execution_state(4, "Coordinator", Some(iteration), Some(max_steps), None);

            let workflow_list = self.services.workflows.list().await.join(", ");
            let extra = format!(
                "Goal: {}\nAvailable workflows: {}\nRecent steps:\n{}",
                self.goal,
                workflow_list,
                step_log.iter().rev().take(5).cloned().collect::<Vec<_>>().join("\n")
            );

            let response = match self
                .services
                .llm_call("coordinator", Role::Mind, doc, turn_dir, PHASE, Some(&extra))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("[Coordinator] LLM call failed: {}", e);
                    break ("blocked", format!("llm failure: {}", e));
                }
            };

            let Some(action) = parse_action(&response) else {
                parse_failures += 1;
                warn!(parse_failures, "[Coordinator] Unparseable response");
                if parse_failures >= 2 {
                    break ("blocked", "coordinator responses unparseable".to_string());
                }
                continue;
            };

            match action {
                Action::Done { reason } => break ("done", reason),
                Action::Blocked { reason } => break ("blocked", reason),
                Action::WorkflowCall {
                    workflow,
                    args,
                    rationale,
                } => {
                    debug!(%workflow, %rationale, "Coordinator: WORKFLOW_CALL");
                    let args_value = Value::Object(args.clone());

                    if circular.record(&workflow, &args_value) {
                        break ("blocked", "circular call pattern detected".to_string());
                    }

                    // Research guard keys on the query the workflow will run
                    let research_query = args
                        .get("query")
                        .and_then(Value::as_str)
                        .unwrap_or(&self.goal)
                        .to_string();
                    let is_research = workflow.contains("research") || workflow.contains("search");
                    if is_research {
                        if let Err(reason) = research_guard.check(&research_query) {
                            step_log.push(format!("- step {}: {} refused ({})", iteration, workflow, reason));
                            doc.append_to_section(4, &format!("**Refused:** {} ({})", workflow, reason), "\n")
                                .ok();
                            continue;
                        }
                    }

                    let Some(definition) = self.services.workflows.resolve(&workflow).await else {
                        failures += 1;
                        step_log.push(format!("- step {}: unknown workflow {}", iteration, workflow));
                        if failures >= 3 {
                            break ("blocked", "too many tool failures".to_string());
                        }
                        continue;
                    };

                    tool_calls += 1;
                    self.services.metrics.record_tool_call(PHASE);
                    let result = self
                        .services
                        .step_runner
                        .run(&definition, args, Some(doc), doc.mode)
                        .await;

                    let outputs_value = Value::Object(result.outputs.clone());
                    let (claims, rejected) = extract_claims(&outputs_value, &definition.name);
                    if rejected > 0 {
                        warn!("[Coordinator] {} claims missing source metadata", rejected);
                        break ("blocked", "critical_failure:missing_source_metadata".to_string());
                    }
                    for claim in claims {
                        if let Err(e) = doc.claims.add(claim) {
                            warn!("[Coordinator] Claim rejected: {}", e);
                        }
                    }

                    if is_research {
                        let findings = result
                            .outputs
                            .get("findings")
                            .and_then(Value::as_array)
                            .map(|a| a.len())
                            .unwrap_or_else(|| doc.claims.len());
                        research_guard.record_findings(findings);
                    }

                    toolresults.push_str(&format!(
                        "## {} (step {})\n\nstatus: {}\n\n```json\n{}\n```\n\n",
                        definition.name,
                        iteration,
                        if result.success { "success" } else { "failed" },
                        serde_json::to_string_pretty(&outputs_value).unwrap_or_default()
                    ));
                    step_log.push(format!(
                        "- step {}: {} -> {} ({} claims)",
                        iteration,
                        definition.name,
                        if result.success { "success" } else { "failed" },
                        doc.claims.len()
                    ));

                    if !result.success {
                        failures += 1;
                        // Critical tool errors pause for user intervention;
                        // denial or timeout means skip
                        let critical = outputs_value.get("critical").and_then(Value::as_bool).unwrap_or(false);
                        if critical {
                            let request_id = format!("intervention-{}-{}", doc.session_id, iteration);
                            let proceed = self
                                .services
                                .broker
                                .await_approval(
                                    &request_id,
                                    std::time::Duration::from_secs(self.services.limits.approval_timeout_secs),
                                )
                                .await;
                            if !proceed {
                                step_log.push(format!("- step {}: skipped after intervention", iteration));
                            }
                        }
                        if failures >= 3 {
                            break ("blocked", "too many tool failures".to_string());
                        }
                        continue;
                    }

                    if let Some(reason) = self.early_termination(doc, iteration) {
                        break ("done", reason);
                    }
                }
            }
        };

        let outcome = CoordinatorOutcome {
            status: status.to_string(),
            termination_reason,
            iterations: iteration,
            tool_calls,
            toolresults,
            ticket: step_log.join("\n"),
        };
        self.finalize(doc, &outcome, &step_log);
        outcome
    }

    /// Exit early when the claim count already satisfies the task shape
    fn early_termination(&self, doc: &ContextDocument, iteration: u32) -> Option<String> {
        let intent = format!("{} {}", doc.action_needed(), doc.user_purpose()).to_lowercase();
        let claims = doc.claims.len();

        let navigational = ["navigate", "open", "go to", "visit"].iter().any(|k| intent.contains(k));
        if navigational && claims >= 2 {
            return Some("navigational task satisfied".to_string());
        }

        let commerce = ["buy", "purchase", "shop", "price", "product", "commerce"]
            .iter()
            .any(|k| intent.contains(k));
        if commerce && claims >= 5 && iteration >= 3 {
            return Some("commerce task satisfied".to_string());
        }
        None
    }

    /// Write the §4 summary block
    fn finalize(&self, doc: &mut ContextDocument, outcome: &CoordinatorOutcome, step_log: &[String]) {
        let mut summary = format!(
            "**Status:** {}\n**Iterations:** {}\n**Tool calls:** {}\n**Termination:** {}\n",
            outcome.status, outcome.iterations, outcome.tool_calls, outcome.termination_reason
        );
        if !step_log.is_empty() {
            summary.push_str("\n**Steps:**\n");
            summary.push_str(&step_log.join("\n"));
            summary.push('\n');
        }
        if !doc.claims.is_empty() {
            summary.push_str("\n**Claims:**\n");
            for claim in doc.claims.by_confidence() {
                let source = claim.url.as_deref().or(claim.source_ref.as_deref()).unwrap_or(&claim.source);
                summary.push_str(&format!("- {} ({:.2}, {})\n", claim.content, claim.confidence, source));
            }
        }
        doc.append_to_section(4, &summary, "\n\n").ok();
    }
}
