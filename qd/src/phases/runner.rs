//! PhaseRunner - one request, end to end
//!
//! Opens the turn, runs the gate, gathers context, extracts constraints,
//! then drives the planning/synthesis/validation retry loop. Save runs on
//! every path, including early clarification and aborts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use contextdoc::{ContextDocument, Mode, QueryAnalysis};
use turnstore::{create_turn_directory, Manifest, PathType, TurnDirectory};
use uuid::Uuid;

use crate::config::Config;
use crate::constraints::ConstraintExtractor;
use crate::events::{EventSink, ThinkingEvent};
use crate::extension::ToolCreator;
use crate::llm::LlmClient;
use crate::loops::{write_context, LoopServices};
use crate::pack::{Compressor, PackBuilder};
use crate::planning::{ContextRefresher, PlanningLoop};
use crate::prompts::PromptLoader;
use crate::tools::{ApprovalBroker, PermissionGate, ToolCatalog, ToolExecutor, ToolServerClient};
use crate::validation::{Decision, ValidationController, ValidationResult};
use crate::workflow::{StepRunner, WorkflowRegistry};

use super::context::gather_context;
use super::metrics::PhaseMetrics;
use super::reflection::{run_reflection, ReflectionDecision};
use super::synthesis::{run_synthesis, SynthesisOutcome};

/// Message used when nothing usable survived synthesis and validation
const POLITE_FAILURE: &str =
    "I wasn't able to find reliable information to answer this. Could you rephrase the request or narrow it down?";

/// One incoming request
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub query: String,
    pub session_id: String,
    pub mode: Mode,

    /// Phase 0 output; a minimal analysis is derived when absent
    pub query_analysis: Option<QueryAnalysis>,
    pub is_multi_task: bool,
    pub workflow_hint: Option<String>,
    pub repo: Option<String>,
}

impl TurnRequest {
    pub fn new(query: impl Into<String>, session_id: impl Into<String>, mode: Mode) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            mode,
            query_analysis: None,
            is_multi_task: false,
            workflow_hint: None,
            repo: None,
        }
    }
}

/// The finished turn, as seen by the caller
#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub turn_id: String,
    pub response: String,
    pub needs_clarification: bool,
    pub clarification_question: Option<String>,
    pub decision: String,
    pub confidence: f64,
    pub retries: u32,
}

/// Delegate for multi-task queries (task breakdown is upstream of the core)
#[async_trait]
pub trait MultiTaskHandler: Send + Sync {
    async fn handle(&self, request: &TurnRequest) -> TurnResponse;
}

/// Top-level request handler
pub struct PhaseRunner {
    config: Config,
    llm: Arc<dyn LlmClient>,
    catalog: Arc<ToolCatalog>,
    workflows: Arc<WorkflowRegistry>,
    broker: Arc<ApprovalBroker>,
    events: Arc<dyn EventSink>,
    refresher: Arc<dyn ContextRefresher>,
    multi_task: Option<Arc<dyn MultiTaskHandler>>,
    gate: PermissionGate,
}

impl PhaseRunner {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        catalog: Arc<ToolCatalog>,
        workflows: Arc<WorkflowRegistry>,
        broker: Arc<ApprovalBroker>,
        events: Arc<dyn EventSink>,
        refresher: Arc<dyn ContextRefresher>,
    ) -> Self {
        Self {
            config,
            llm,
            catalog,
            workflows,
            broker,
            events,
            refresher,
            multi_task: None,
            gate: PermissionGate::permissive(),
        }
    }

    pub fn with_multi_task_handler(mut self, handler: Arc<dyn MultiTaskHandler>) -> Self {
        self.multi_task = Some(handler);
        self
    }

    pub fn with_gate(mut self, gate: PermissionGate) -> Self {
        self.gate = gate;
        self
    }

    /// Fresh per-request service bundle (metrics start clean)
    fn services(&self) -> eyre::Result<LoopServices> {
        let server = Arc::new(ToolServerClient::from_config(&self.config.tool_server)?);
        let prompts = Arc::new(PromptLoader::new("."));
        let compressor = Compressor::with_llm(self.llm.clone(), PromptLoader::new("."));
        Ok(LoopServices {
            llm: self.llm.clone(),
            prompts,
            pack_builder: Arc::new(PackBuilder::new(compressor)),
            recipes_dir: self.config.storage.recipes_dir.clone(),
            catalog: self.catalog.clone(),
            workflows: self.workflows.clone(),
            step_runner: Arc::new(StepRunner::new(self.catalog.clone())),
            tool_executor: Arc::new(
                ToolExecutor::new(self.catalog.clone(), self.gate.clone(), self.broker.clone())
                    .with_approval_timeout(std::time::Duration::from_secs(self.config.limits.approval_timeout_secs)),
            ),
            tool_creator: Arc::new(
                ToolCreator::new(self.config.storage.bundles_dir.clone(), self.catalog.clone(), server)
                    .with_backup_keep_count(self.config.validation.backup_keep_count)
                    .with_test_timeout(std::time::Duration::from_secs(
                        self.config.validation.sandbox_test_timeout_secs,
                    )),
            ),
            broker: self.broker.clone(),
            events: self.events.clone(),
            metrics: Arc::new(PhaseMetrics::new()),
            limits: self.config.limits.clone(),
        })
    }

    /// Handle one request
    ///
    /// Save (phase 8) runs on every exit path; a failed pipeline still
    /// seals the turn with `status=error`.
    pub async fn handle(&self, request: TurnRequest) -> eyre::Result<TurnResponse> {
        if request.is_multi_task {
            if let Some(handler) = &self.multi_task {
                info!("[PhaseRunner] Delegating multi-task query");
                return Ok(handler.handle(&request).await);
            }
        }

        let trace_id = Uuid::now_v7().to_string();
        let turn_dir = create_turn_directory(
            &self.config.storage.turns_dir,
            &trace_id,
            &request.session_id,
            &request.mode.to_string(),
        )?;
        let mut manifest = Manifest::new(&turn_dir, Some(&request.query));
        turn_dir.write_user_query(&request.query, &[])?;
        manifest.record_doc_created("user_query.md");
        manifest.save(&turn_dir)?;

        let turn_number: u64 = turn_dir.turn_id.trim_start_matches("turn_").parse().unwrap_or(0);
        let mut doc = ContextDocument::new(&request.query, &request.session_id, turn_number, request.mode, &trace_id);
        doc.workflow_hint = request.workflow_hint.clone();
        doc.repo = request.repo.clone();
        let analysis = request.query_analysis.clone().unwrap_or_else(|| QueryAnalysis {
            action_needed: "answer the query".to_string(),
            data_requirements: Vec::new(),
            user_purpose: String::new(),
            content_reference: None,
            prior_context: String::new(),
        });
        std::fs::write(
            turn_dir.doc_path("query_analysis.json", PathType::Turn),
            serde_json::to_string_pretty(&analysis)?,
        )?;
        manifest.record_doc_created("query_analysis.json");
        doc.set_query_analysis(analysis);

        let services = self.services()?;
        self.events
            .emit(ThinkingEvent::new(&trace_id, "turn_start", "active").with_details(turn_dir.turn_id.clone()));

        let (response, status) = match self.run_phases(&services, &mut doc, &turn_dir).await {
            Ok(response) => (response, "completed"),
            Err(e) => {
                warn!("[PhaseRunner] Pipeline error: {}", e);
                (
                    TurnResponse {
                        turn_id: turn_dir.turn_id.clone(),
                        response: POLITE_FAILURE.to_string(),
                        needs_clarification: false,
                        clarification_question: None,
                        decision: "FAIL".to_string(),
                        confidence: 0.0,
                        retries: services.metrics.retries(),
                    },
                    "error",
                )
            }
        };

        self.save(&services, &mut doc, &turn_dir, &mut manifest, status, &response)?;
        self.events
            .emit(ThinkingEvent::new(&trace_id, "turn_end", status).with_confidence(response.confidence));
        Ok(response)
    }

    async fn run_phases(
        &self,
        services: &LoopServices,
        doc: &mut ContextDocument,
        turn_dir: &TurnDirectory,
    ) -> eyre::Result<TurnResponse> {
        let limits = &self.config.limits;

        // Phase 1.5: the fast gate
        services.metrics.start_phase("phase1_5_validation");
        doc.update_execution_state(1, "Query Analysis Validation", None, None, None);
        let gate = run_reflection(services, doc, turn_dir).await;
        services.metrics.end_phase("phase1_5_validation");

        if let ReflectionDecision::Clarify {
            clarification_question, ..
        } = gate
        {
            services.metrics.record_decision("CLARIFY");
            return Ok(TurnResponse {
                turn_id: turn_dir.turn_id.clone(),
                response: clarification_question.clone(),
                needs_clarification: true,
                clarification_question: Some(clarification_question),
                decision: "CLARIFY".to_string(),
                confidence: 1.0,
                retries: 0,
            });
        }

        // Phase 2: context gathering
        doc.update_execution_state(2, "Context Gatherer", None, None, None);
        gather_context(services, doc, turn_dir, &self.config.storage.turns_dir).await;

        // Phase 2.5: constraint extraction
        services.metrics.start_phase("phase2_5_constraints");
        let constraints = ConstraintExtractor::new().extract(&doc.query, doc.get_section(2).unwrap_or(""));
        constraints.save(turn_dir)?;
        if !constraints.is_empty() {
            doc.append_to_section(1, &constraints.to_markdown_block(), "\n\n")?;
        }
        services.metrics.end_phase("phase2_5_constraints");

        // Phases 3-7: the retry loop
        let mut best: Option<(String, ValidationResult)> = None;
        let mut final_answer: Option<(String, ValidationResult)> = None;
        let mut research_failure: Option<String> = None;

        for attempt in 1..=limits.max_retries {
            info!("[PhaseRunner] Attempt {}/{}", attempt, limits.max_retries);
            doc.update_execution_state(3, "Planning", Some(attempt), Some(limits.max_retries), None);

            services.metrics.start_phase("phase3_planning");
            let planning = PlanningLoop::new(services, self.refresher.clone()).run(doc, turn_dir).await;
            services.metrics.end_phase("phase3_planning");

            std::fs::write(
                turn_dir.doc_path("toolresults.md", PathType::Turn),
                &planning.toolresults_content,
            )?;
            std::fs::write(turn_dir.doc_path("ticket.md", PathType::Turn), &planning.ticket_content)?;

            // Phase 6
            services.metrics.start_phase("phase6_synthesis");
            doc.update_execution_state(6, "Synthesis", Some(attempt), None, None);
            let synthesis = run_synthesis(services, doc, turn_dir).await;
            services.metrics.end_phase("phase6_synthesis");

            let (draft, _checklist) = match synthesis {
                SynthesisOutcome::Answer {
                    answer,
                    validation_checklist,
                } => (answer, validation_checklist),
                SynthesisOutcome::ResearchFailure { reason } => {
                    research_failure = Some(reason);
                    break;
                }
                SynthesisOutcome::Invalid { reason } | SynthesisOutcome::CallFailed { error: reason } => {
                    warn!("[PhaseRunner] Synthesis unusable ({}), retrying", reason);
                    services.metrics.record_retry();
                    if attempt < limits.max_retries {
                        turn_dir.archive_attempt(attempt)?;
                        std::fs::write(
                            turn_dir.doc_path("retry_context.json", PathType::Turn),
                            json!({"reason": "SYNTHESIS_INVALID", "failed_urls": [], "detail": reason}).to_string(),
                        )?;
                    }
                    continue;
                }
            };

            // Phase 7
            services.metrics.start_phase("phase7_validation");
            doc.update_execution_state(7, "Validation", Some(attempt), None, None);
            let controller = ValidationController::new(services, self.config.validation.clone());
            let mut result = controller.validate(&draft, doc, turn_dir, attempt - 1, limits.max_retries).await;
            services.metrics.record_decision(&result.decision.to_string());
            let mut draft = draft;

            // Bounded validator-driven revisions
            let mut revisions = 0;
            while result.decision == Decision::Revise && revisions < limits.max_validation_revisions {
                revisions += 1;
                let hints = result.revision_hints.clone().unwrap_or_default();
                match controller.revise(&draft, &hints, doc, turn_dir).await {
                    Some(revised) => {
                        draft = revised;
                        result = controller.validate(&draft, doc, turn_dir, attempt - 1, limits.max_retries).await;
                        services.metrics.record_decision(&result.decision.to_string());
                    }
                    None => break,
                }
            }
            services.metrics.end_phase("phase7_validation");

            if best
                .as_ref()
                .map(|(_, prior)| result.confidence > prior.confidence)
                .unwrap_or(true)
            {
                best = Some((draft.clone(), result.clone()));
            }

            if result.decision.is_approval() && result.confidence >= self.config.validation.confidence_threshold {
                final_answer = Some((draft, result));
                break;
            }
            if result.decision == Decision::Fail {
                warn!("[PhaseRunner] Validator FAIL at attempt {}", attempt);
                break;
            }

            // RETRY path: archive, write retry context, invalidate claims
            services.metrics.record_retry();
            if attempt < limits.max_retries {
                controller.apply_retry(&result, doc, turn_dir, attempt)?;
                // The validator may point at a better workflow
                if let Some(context) = &result.failure_context {
                    for fix in &context.suggested_fixes {
                        if let Some(workflow) = fix.strip_prefix("workflow:") {
                            doc.workflow_hint = Some(workflow.trim().to_string());
                        }
                    }
                }
            }
        }

        if let Some(reason) = research_failure {
            return Ok(TurnResponse {
                turn_id: turn_dir.turn_id.clone(),
                response: format!("{} ({})", POLITE_FAILURE, reason),
                needs_clarification: false,
                clarification_question: None,
                decision: "FAIL".to_string(),
                confidence: 0.0,
                retries: services.metrics.retries(),
            });
        }

        // Retry exhaustion prefers the best-seen response by confidence;
        // a malformed best-seen counts as absent
        let (response, decision, confidence) = match final_answer.or(best) {
            Some((answer, result)) if !is_malformed(&answer) => {
                let mut response = answer;
                if result.decision == Decision::ApprovePartial && !result.goal_statuses.is_empty() {
                    response.push_str("\n\nNote: not every goal could be fulfilled:\n");
                    for goal in &result.goal_statuses {
                        response.push_str(&format!("- {}: {}\n", goal.goal_id, goal.status));
                    }
                }
                (response, result.decision.to_string(), result.confidence)
            }
            _ => (POLITE_FAILURE.to_string(), "FAIL".to_string(), 0.0),
        };

        Ok(TurnResponse {
            turn_id: turn_dir.turn_id.clone(),
            response,
            needs_clarification: false,
            clarification_question: None,
            decision,
            confidence,
            retries: services.metrics.retries(),
        })
    }

    /// Phase 8: seal the turn
    fn save(
        &self,
        services: &LoopServices,
        doc: &mut ContextDocument,
        turn_dir: &TurnDirectory,
        manifest: &mut Manifest,
        status: &str,
        response: &TurnResponse,
    ) -> eyre::Result<()> {
        services.metrics.start_phase("phase8_save");
        doc.update_execution_state(8, "Save", None, None, None);
        // A clarification turn seals its manifest but writes no §8
        if !response.needs_clarification {
            doc.append_section(
                8,
                "Save",
                &format!(
                    "**Status:** {}\n**Decision:** {}\n**Confidence:** {:.2}\n**Retries:** {}\n",
                    status, response.decision, response.confidence, response.retries
                ),
            )
            .ok();
        }
        write_context(doc, turn_dir)?;

        let execution_state = json!({
            "execution_state": doc.execution_state,
            "metrics": services.metrics.snapshot(),
            "decision": response.decision,
            "confidence": response.confidence,
            "quality_score": response.confidence,
        });
        std::fs::write(
            turn_dir.doc_path("execution_state.json", PathType::Turn),
            serde_json::to_string_pretty(&execution_state)?,
        )?;

        for (phase, tokens) in services.metrics.tokens_by_phase() {
            manifest.record_token_usage(&phase, tokens);
        }
        services.metrics.end_phase("phase8_save");

        // The manifest must list every file this turn produced
        let artifact_manifest = json!({"documents": turn_dir.list_docs()});
        std::fs::write(
            turn_dir.doc_path("artifact_manifest.json", PathType::Turn),
            serde_json::to_string_pretty(&artifact_manifest)?,
        )?;
        for doc_name in turn_dir.list_docs() {
            manifest.record_doc_created(&doc_name);
        }
        manifest.finalize(turn_dir, status)?;
        info!("[PhaseRunner] Sealed {} as {}", turn_dir.turn_id, status);
        Ok(())
    }
}

fn is_malformed(answer: &str) -> bool {
    let trimmed = answer.trim();
    trimmed.is_empty()
        || trimmed.contains("\"_type\"")
        || (trimmed.starts_with('{') && trimmed.contains("solver_history"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_malformed() {
        assert!(is_malformed(""));
        assert!(is_malformed("  "));
        assert!(is_malformed(r#"{"_type": "INVALID", "reason": "x"}"#));
        assert!(is_malformed(r#"{"solver_history": []}"#));
        assert!(!is_malformed("The Nano costs $8.99."));
    }
}
