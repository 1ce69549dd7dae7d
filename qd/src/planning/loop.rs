//! Planning loop - phase 3's outer controller
//!
//! Strategic-plan-first: parse the planner's structured response and
//! route the turn. When the planner emits anything else, fall back to the
//! bounded legacy EXECUTE/COMPLETE loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use contextdoc::ContextDocument;
use turnstore::{PathType, TurnDirectory};

use crate::events::ThinkingEvent;
use crate::extension::{generate_tool, CreateToolRequest};
use crate::llm::Role;
use crate::loops::{ExecutorLoop, LoopServices};
use crate::planning::{extract_json, PlanStateManager, Route, StrategicPlan};

const PHASE: &str = "phase3_planning";

/// External collaborator that re-gathers context on demand
#[async_trait]
pub trait ContextRefresher: Send + Sync {
    async fn refresh(&self, doc: &mut ContextDocument) -> eyre::Result<()>;
}

/// Refresher that does nothing (default wiring)
pub struct NoopRefresher;

#[async_trait]
impl ContextRefresher for NoopRefresher {
    async fn refresh(&self, _doc: &mut ContextDocument) -> eyre::Result<()> {
        Ok(())
    }
}

/// Result of the planning phase
#[derive(Debug)]
pub struct PlanningOutcome {
    /// Route that ended up driving the turn
    pub route: String,

    pub ticket_content: String,
    pub toolresults_content: String,

    /// Whether any tools actually ran
    pub executed: bool,
}

/// Phase 3 controller
pub struct PlanningLoop<'a> {
    services: &'a LoopServices,
    refresher: Arc<dyn ContextRefresher>,
    plan_state: PlanStateManager,
}

impl<'a> PlanningLoop<'a> {
    pub fn new(services: &'a LoopServices, refresher: Arc<dyn ContextRefresher>) -> Self {
        Self {
            services,
            refresher,
            plan_state: PlanStateManager,
        }
    }

    pub async fn run(&self, doc: &mut ContextDocument, turn_dir: &TurnDirectory) -> PlanningOutcome {
        info!("[PlanningLoop] Starting");
        self.services
            .events
            .emit(ThinkingEvent::new(&doc.trace_id, "phase3_planning", "active"));
        let skip_urls = self.load_retry_skip_list(turn_dir);
        let extra = if skip_urls.is_empty() {
            None
        } else {
            Some(format!(
                "A previous attempt failed validation. Do NOT use these URLs: {}",
                skip_urls.join(", ")
            ))
        };

        let outcome = match self.attempt_strategic_plan(doc, turn_dir, extra.as_deref()).await {
            Some(plan) => self.dispatch(plan, doc, turn_dir, true).await,
            None => {
                info!("[PlanningLoop] No STRATEGIC_PLAN, falling back to legacy loop");
                self.run_legacy_loop(doc, turn_dir).await
            }
        };
        self.services.events.emit(
            ThinkingEvent::new(&doc.trace_id, "phase3_planning", "complete").with_details(outcome.route.clone()),
        );
        outcome
    }

    async fn attempt_strategic_plan(
        &self,
        doc: &mut ContextDocument,
        turn_dir: &TurnDirectory,
        extra: Option<&str>,
    ) -> Option<StrategicPlan> {
        let response = match self
            .services
            .llm_call("planner", Role::Mind, doc, turn_dir, PHASE, extra)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("[PlanningLoop] Planner call failed: {}", e);
                return None;
            }
        };

        let plan = StrategicPlan::parse(&response)?;
        info!("[PlanningLoop] STRATEGIC_PLAN received - route_to: {}", plan.route);

        if let Err(e) = self.plan_state.initialize(turn_dir, &plan.goals, 3, true) {
            warn!("[PlanningLoop] Failed to initialize plan state: {}", e);
        }
        self.write_plan_section(doc, &plan);
        Some(plan)
    }

    /// Write §3 from the strategic plan
    fn write_plan_section(&self, doc: &mut ContextDocument, plan: &StrategicPlan) {
        let mut body = format!("**Route:** {}\n", plan.route);
        if let Some(resolved) = &plan.resolved_query {
            body.push_str(&format!("**Resolved Query:** {}\n", resolved));
        }
        if !plan.reasoning.is_empty() {
            body.push_str(&format!("**Reasoning:** {}\n", plan.reasoning));
        }
        if !plan.goals.is_empty() {
            body.push_str("\n**Goals:**\n");
            for goal in self.plan_state.normalize_goals(&plan.goals) {
                body.push_str(&format!("- {}: {}\n", goal.id, goal.description));
            }
        }
        doc.append_section(3, "Plan", &body).ok();
    }

    async fn dispatch(
        &self,
        plan: StrategicPlan,
        doc: &mut ContextDocument,
        turn_dir: &TurnDirectory,
        refresh_allowed: bool,
    ) -> PlanningOutcome {
        let ticket = serde_json::to_string_pretty(&plan.raw).unwrap_or_default();

        match plan.route {
            Route::Synthesis => PlanningOutcome {
                route: "synthesis".to_string(),
                ticket_content: ticket,
                toolresults_content: "No tools were executed; the context already answers the query.\n".to_string(),
                executed: false,
            },
            Route::Clarify | Route::Brainstorm => PlanningOutcome {
                route: plan.route.to_string(),
                ticket_content: ticket,
                toolresults_content: String::new(),
                executed: false,
            },
            Route::RefreshContext => {
                if !refresh_allowed {
                    debug!("[PlanningLoop] refresh_context after refresh, demoting to synthesis");
                    return PlanningOutcome {
                        route: "synthesis".to_string(),
                        ticket_content: ticket,
                        toolresults_content: String::new(),
                        executed: false,
                    };
                }
                info!("[PlanningLoop] Routing to refresh_context");
                if let Err(e) = self.refresher.refresh(doc).await {
                    warn!("[PlanningLoop] Context refresh failed: {}", e);
                }
                // One more plan attempt with refresh disabled
                match self.attempt_strategic_plan(doc, turn_dir, None).await {
                    Some(second) => Box::pin(self.dispatch(second, doc, turn_dir, false)).await,
                    None => self.run_legacy_loop(doc, turn_dir).await,
                }
            }
            Route::Executor => {
                info!("[PlanningLoop] Routing to executor");
                let outcome = ExecutorLoop::new(self.services).run(doc, turn_dir).await;

                // Replan once against the updated context; the result is
                // recorded but never re-enters the executor
                if let Ok(response) = self
                    .services
                    .llm_call("planner", Role::Mind, doc, turn_dir, PHASE, Some("Replan: execution finished. Route the result."))
                    .await
                {
                    if let Some(replan) = StrategicPlan::parse(&response) {
                        doc.append_to_section(3, &format!("**Replan route:** {}", replan.route), "\n\n").ok();
                    }
                }

                let mut ticket_content = ticket;
                ticket_content.push_str("\n\n## Execution Log\n\n");
                ticket_content.push_str(&outcome.ticket);

                PlanningOutcome {
                    route: "executor".to_string(),
                    ticket_content,
                    toolresults_content: outcome.toolresults,
                    executed: true,
                }
            }
            Route::SelfExtension => self.handle_self_extension(plan, doc, turn_dir).await,
        }
    }

    /// Generate and create each missing tool, then re-route to executor once
    async fn handle_self_extension(
        &self,
        plan: StrategicPlan,
        doc: &mut ContextDocument,
        turn_dir: &TurnDirectory,
    ) -> PlanningOutcome {
        if plan.missing_tools.is_empty() {
            warn!("[PlanningLoop] Self-extension triggered with no missing_tools");
            return PlanningOutcome {
                route: "self_extension".to_string(),
                ticket_content: serde_json::to_string_pretty(&plan.raw).unwrap_or_default(),
                toolresults_content: String::new(),
                executed: false,
            };
        }

        info!("[PlanningLoop] Self-extension: creating {} missing tools", plan.missing_tools.len());
        let mut created: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for tool_name in &plan.missing_tools {
            let generated = match generate_tool(&self.services.llm, &self.services.prompts, tool_name, &doc.query).await
            {
                Ok(generated) => generated,
                Err(e) => {
                    warn!("[PlanningLoop] Generation failed for {}: {}", tool_name, e);
                    failed.push(tool_name.clone());
                    continue;
                }
            };

            let request = CreateToolRequest {
                workflow: "self_extension".to_string(),
                tool_name: tool_name.clone(),
                spec_markdown: generated.spec_markdown,
                impl_source: generated.impl_source,
                test_source: generated.test_source,
                skip_tests: false,
            };
            let result = self.services.tool_creator.create(request, turn_dir).await;
            if result.success {
                created.push(tool_name.clone());
            } else {
                failed.push(tool_name.clone());
            }
        }

        let extension_record = serde_json::json!({
            "triggered_by": "missing_tools",
            "missing_tools": plan.missing_tools,
            "created": created,
            "failed": failed,
        });
        let path = turn_dir.doc_path("self_extension.json", PathType::Turn);
        if let Err(e) = std::fs::write(&path, serde_json::to_string_pretty(&extension_record).unwrap_or_default()) {
            warn!("[PlanningLoop] Failed to write self_extension.json: {}", e);
        }
        doc.append_to_section(
            3,
            &format!("**Self-extension:** created {:?}, failed {:?}", created, failed),
            "\n\n",
        )
        .ok();

        if created.is_empty() {
            return PlanningOutcome {
                route: "self_extension".to_string(),
                ticket_content: serde_json::to_string_pretty(&extension_record).unwrap_or_default(),
                toolresults_content: String::new(),
                executed: false,
            };
        }

        // Re-route to executor exactly once
        let mut rerouted = plan;
        rerouted.route = Route::Executor;
        Box::pin(self.dispatch(rerouted, doc, turn_dir, false)).await
    }

    /// Legacy bounded loop: EXECUTE / REFRESH_CONTEXT (demoted) / COMPLETE
    async fn run_legacy_loop(&self, doc: &mut ContextDocument, turn_dir: &TurnDirectory) -> PlanningOutcome {
        let max_iterations = self.services.limits.max_planning_iterations;
        let mut toolresults = String::new();
        let mut log: Vec<String> = Vec::new();
        let mut executed = false;
        let mut total_tool_calls = 0u32;

        for iteration in 1..=max_iterations {
            doc.update_execution_state(3, "Legacy Planning", Some(iteration), Some(max_iterations), None);
            let extra = "Respond with one JSON object: {\"action\": \"EXECUTE\", \"steps\": [{\"tool\": \"...\", \"args\": {...}}]} or {\"action\": \"COMPLETE\", \"reasoning\": \"...\"}.";

            let response = match self
                .services
                .llm_call("planner", Role::Mind, doc, turn_dir, PHASE, Some(extra))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("[PlanningLoop] Legacy planner call failed: {}", e);
                    break;
                }
            };
            let Some(payload) = extract_json(&response) else {
                log.push(format!("- iteration {}: unparseable planner response", iteration));
                continue;
            };

            let mut action = payload.get("action").and_then(Value::as_str).unwrap_or("COMPLETE").to_string();
            if action == "REFRESH_CONTEXT" {
                // Refresh already had its chance before the inner loop;
                // the conversion is permanent for the life of the loop
                warn!("[PlanningLoop] REFRESH_CONTEXT in legacy loop, demoting to EXECUTE");
                log.push(format!("- iteration {}: REFRESH_CONTEXT demoted to EXECUTE", iteration));
                action = "EXECUTE".to_string();
            }

            match action.as_str() {
                "COMPLETE" => {
                    log.push(format!("- iteration {}: COMPLETE", iteration));
                    break;
                }
                "EXECUTE" => {
                    let steps = payload.get("steps").and_then(Value::as_array).cloned().unwrap_or_default();
                    if steps.is_empty() {
                        log.push(format!("- iteration {}: EXECUTE with no steps, treating as COMPLETE", iteration));
                        break;
                    }
                    if total_tool_calls + steps.len() as u32 > self.services.limits.max_tool_calls {
                        log.push(format!("- iteration {}: tool call cap reached", iteration));
                        break;
                    }
                    total_tool_calls += steps.len() as u32;
                    executed = true;

                    let outcomes = self.services.tool_executor.execute_plan(&steps, turn_dir, doc).await;
                    for outcome in &outcomes {
                        self.services.metrics.record_tool_call(PHASE);
                        for claim in &outcome.claims {
                            doc.claims.add(claim.clone()).ok();
                        }
                        toolresults.push_str(&format!(
                            "## {} (legacy)\n\nstatus: {}\n\n```json\n{}\n```\n\n",
                            outcome.tool,
                            outcome.status,
                            serde_json::to_string_pretty(&outcome.raw_result).unwrap_or_default()
                        ));
                        log.push(format!("- iteration {}: {} -> {}", iteration, outcome.tool, outcome.status));
                    }
                }
                other => {
                    log.push(format!("- iteration {}: unknown action {}", iteration, other));
                }
            }
        }

        if !log.is_empty() {
            doc.append_to_section(4, &log.join("\n"), "\n\n").ok();
        }

        PlanningOutcome {
            route: "legacy".to_string(),
            ticket_content: log.join("\n"),
            toolresults_content: toolresults,
            executed,
        }
    }

    fn load_retry_skip_list(&self, turn_dir: &TurnDirectory) -> Vec<String> {
        let path = turn_dir.doc_path("retry_context.json", PathType::Turn);
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        serde_json::from_str::<Value>(&content)
            .ok()
            .and_then(|v| v.get("failed_urls").and_then(Value::as_array).cloned())
            .map(|urls| urls.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default()
    }
}
