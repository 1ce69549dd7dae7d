//! ToolExecutor - the single-call contract around every tool invocation
//!
//! Order per call: constraint pre-check, permission gate, argument
//! enrichment, catalog dispatch, claim extraction. Constraint and
//! permission failures block the call before it reaches the tool.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use contextdoc::{Claim, ContextDocument, Mode};
use turnstore::TurnDirectory;

use crate::constraints::{check_tool_call, ConstraintSet};
use crate::planning::PlanStateManager;

use super::catalog::ToolCatalog;
use super::gate::{ApprovalBroker, GateDecision, PermissionGate};

/// Result of one tool call, normalized
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub tool: String,

    /// `success` | `error` | `blocked` | `denied`
    pub status: String,

    pub description: String,
    pub raw_result: Value,
    pub claims: Vec<Claim>,

    /// Claims dropped for missing source metadata
    pub rejected_claims: usize,

    pub resolved_query: String,
}

impl ToolCallOutcome {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn is_blocked(&self) -> bool {
        self.status == "blocked"
    }
}

/// Executes single tool calls and sequential multi-step plans
pub struct ToolExecutor {
    catalog: Arc<ToolCatalog>,
    gate: PermissionGate,
    broker: Arc<ApprovalBroker>,
    plan_state: PlanStateManager,
    approval_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(catalog: Arc<ToolCatalog>, gate: PermissionGate, broker: Arc<ApprovalBroker>) -> Self {
        Self {
            catalog,
            gate,
            broker,
            plan_state: PlanStateManager,
            approval_timeout: Duration::from_secs(180),
        }
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Execute one tool call under the full contract
    pub async fn execute_single(
        &self,
        tool_name: &str,
        args: Value,
        turn_dir: &TurnDirectory,
        context_doc: &ContextDocument,
    ) -> ToolCallOutcome {
        debug!(%tool_name, "ToolExecutor::execute_single: called");
        let resolved_query = self.resolve_query(context_doc);

        // 1. Constraints gate the call before anything runs
        let constraints = ConstraintSet::load(turn_dir);
        if let Some(violation) = check_tool_call(tool_name, &args, &constraints) {
            warn!(%tool_name, reason = %violation.reason, "ToolExecutor: constraint violation");
            let phase = context_doc.execution_state.phase.max(5);
            if let Err(e) = self.plan_state.record_violation(turn_dir, &violation, phase) {
                warn!("Failed to record violation: {}", e);
            }
            return ToolCallOutcome {
                tool: tool_name.to_string(),
                status: "blocked".to_string(),
                description: format!("Constraint violation: {}", violation.reason),
                raw_result: json!({"status": "blocked", "reason": violation.reason}),
                claims: Vec::new(),
                rejected_claims: 0,
                resolved_query,
            };
        }

        // 2. Permission gate (memory tools are local and trusted)
        if !tool_name.starts_with("memory.") {
            match self.gate.check(tool_name, &args, context_doc.mode, &context_doc.session_id) {
                GateDecision::Allowed => {}
                GateDecision::Denied(reason) => {
                    return self.denied_outcome(tool_name, reason, resolved_query);
                }
                GateDecision::NeedsApproval(request_id) => {
                    info!(%tool_name, %request_id, "ToolExecutor: awaiting user approval");
                    if !self.broker.await_approval(&request_id, self.approval_timeout).await {
                        return self.denied_outcome(tool_name, "approval_denied".to_string(), resolved_query);
                    }
                }
            }
        }

        // 3. Enrich the request
        let enriched = self.enrich_args(tool_name, args, turn_dir, context_doc, &resolved_query);

        // 4. Dispatch
        let raw_result = self.catalog.execute(tool_name, enriched, Some(context_doc.mode)).await;
        let status = raw_result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("error")
            .to_string();

        // 5. Claims
        let (claims, rejected_claims) = extract_claims(&raw_result, tool_name);
        if rejected_claims > 0 {
            warn!(%tool_name, rejected_claims, "ToolExecutor: dropped unsourced claims");
        }

        let description = raw_result
            .get("description")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("{} -> {}", tool_name, status));

        ToolCallOutcome {
            tool: tool_name.to_string(),
            status,
            description,
            raw_result,
            claims,
            rejected_claims,
            resolved_query,
        }
    }

    /// Execute a `{steps: [...]}` plan sequentially; a blocked step halts
    pub async fn execute_plan(
        &self,
        steps: &[Value],
        turn_dir: &TurnDirectory,
        context_doc: &ContextDocument,
    ) -> Vec<ToolCallOutcome> {
        let mut outcomes = Vec::new();
        for (idx, step) in steps.iter().enumerate() {
            let Some(tool) = step.get("tool").and_then(Value::as_str) else {
                warn!(idx, "ToolExecutor::execute_plan: step missing tool name, skipping");
                continue;
            };
            let args = step.get("args").cloned().unwrap_or_else(|| json!({}));
            let outcome = self.execute_single(tool, args, turn_dir, context_doc).await;
            let blocked = outcome.is_blocked();
            outcomes.push(outcome);
            if blocked {
                warn!(idx, "ToolExecutor::execute_plan: step blocked, stopping execution");
                break;
            }
        }
        outcomes
    }

    fn denied_outcome(&self, tool_name: &str, reason: String, resolved_query: String) -> ToolCallOutcome {
        ToolCallOutcome {
            tool: tool_name.to_string(),
            status: "denied".to_string(),
            description: reason.clone(),
            raw_result: json!({"status": "denied", "reason": reason}),
            claims: Vec::new(),
            rejected_claims: 0,
            resolved_query,
        }
    }

    /// Prefer the planner-resolved query from §3 over the raw user query
    fn resolve_query(&self, context_doc: &ContextDocument) -> String {
        if let Some(plan) = context_doc.get_section(3) {
            let re = Regex::new(r"(?m)^\*\*Resolved Query:\*\* (.+)$").expect("static regex");
            if let Some(cap) = re.captures(plan) {
                return cap[1].trim().to_string();
            }
        }
        context_doc.query.clone()
    }

    /// Inject the standard enrichment fields into tool args
    fn enrich_args(
        &self,
        tool_name: &str,
        args: Value,
        turn_dir: &TurnDirectory,
        context_doc: &ContextDocument,
        resolved_query: &str,
    ) -> Value {
        let mut map = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };

        map.entry("query").or_insert_with(|| json!(resolved_query));
        map.insert("session_id".to_string(), json!(context_doc.session_id));
        map.insert("turn_number".to_string(), json!(context_doc.turn_number));
        map.insert("turn_id".to_string(), json!(turn_dir.turn_id));

        if context_doc.mode == Mode::Code {
            if let Some(repo) = &context_doc.repo {
                map.entry("repo").or_insert_with(|| json!(repo));
            }
        }
        if tool_name == "repo.scope" {
            map.entry("goal").or_insert_with(|| json!(context_doc.query));
        }

        if tool_name.starts_with("internet.") {
            map.insert(
                "research_context".to_string(),
                self.build_research_context(context_doc),
            );
        }

        Value::Object(map)
    }

    /// Assemble the research_context block from §0, §1, and §2
    fn build_research_context(&self, context_doc: &ContextDocument) -> Value {
        let intent = if context_doc.action_needed().is_empty() {
            "informational".to_string()
        } else {
            format!(
                "{}: {}",
                context_doc.action_needed(),
                context_doc.data_requirements().join(", ")
            )
        };

        let mut research_context = json!({
            "intent": intent,
            "user_purpose": context_doc.user_purpose(),
            "action_needed": context_doc.action_needed(),
            "data_requirements": context_doc.data_requirements(),
            "prior_context": context_doc.prior_context(),
            "user_query": context_doc.query,
        });

        // Topic and preferences come from gathered context (§2)
        if let Some(gathered) = context_doc.get_section(2) {
            if let Some(topic) = first_line_of(gathered) {
                research_context["topic"] = json!(topic);
            }
            if let Some(prefs) = extract_labeled(gathered, "Preferences") {
                research_context["user_preferences"] = json!(prefs);
            }
        }

        // Prior-turn summary comes from §1
        if let Some(validation) = context_doc.get_section(1) {
            if let Some(summary) = extract_labeled(validation, "Prior Turn") {
                research_context["prior_turn_context"] = json!(truncate_chars(&summary, 500));
            }
        }

        if let Some(content_ref) = context_doc.content_reference() {
            research_context["content_reference"] = content_ref.clone();
        }

        research_context
    }
}

fn first_line_of(text: &str) -> Option<String> {
    text.lines().map(str::trim).find(|l| !l.is_empty()).map(String::from)
}

fn extract_labeled(text: &str, label: &str) -> Option<String> {
    let needle = format!("**{}:**", label);
    text.lines()
        .find(|l| l.contains(&needle))
        .map(|l| l.split(&needle).nth(1).unwrap_or("").trim().to_string())
        .filter(|v| !v.is_empty())
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Pull claims out of a tool result, dropping unsourced ones
///
/// Returns the sourced claims and the count of rejected entries.
pub fn extract_claims(result: &Value, tool_name: &str) -> (Vec<Claim>, usize) {
    let Some(entries) = result.get("claims").and_then(Value::as_array) else {
        return (Vec::new(), 0);
    };

    let mut claims = Vec::new();
    let mut rejected = 0;
    for entry in entries {
        let content = entry
            .get("content")
            .or_else(|| entry.get("claim"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let claim = Claim {
            content,
            confidence: entry.get("confidence").and_then(Value::as_f64).unwrap_or(0.8),
            source: entry
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or(tool_name)
                .to_string(),
            ttl_hours: entry.get("ttl_hours").and_then(Value::as_u64).unwrap_or(24) as u32,
            url: entry.get("url").and_then(Value::as_str).map(String::from),
            source_ref: entry.get("source_ref").and_then(Value::as_str).map(String::from),
        };
        if claim.is_sourced() {
            claims.push(claim);
        } else {
            rejected += 1;
        }
    }
    (claims, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{Constraint, ConstraintKind, ConstraintSource};
    use crate::tools::testing::{EchoTool, FixedTool};
    use crate::tools::ToolMode;
    use contextdoc::QueryAnalysis;
    use turnstore::create_turn_directory;

    fn context() -> ContextDocument {
        let mut doc = ContextDocument::new("cheapest Arduino Nano under $10", "sess-1", 1, Mode::Chat, "trace");
        doc.set_query_analysis(QueryAnalysis {
            action_needed: "find product".to_string(),
            data_requirements: vec!["price".to_string()],
            user_purpose: "purchase".to_string(),
            content_reference: None,
            prior_context: String::new(),
        });
        doc
    }

    async fn executor_with(catalog: ToolCatalog) -> ToolExecutor {
        ToolExecutor::new(Arc::new(catalog), PermissionGate::permissive(), Arc::new(ApprovalBroker::new()))
    }

    fn setup_turn() -> (tempfile::TempDir, TurnDirectory) {
        let temp = tempfile::tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "t", "sess-1", "chat").unwrap();
        (temp, turn)
    }

    #[tokio::test]
    async fn test_constraint_blocks_before_tool_runs() {
        let (_temp, turn) = setup_turn();
        crate::constraints::ConstraintSet {
            constraints: vec![Constraint {
                id: "file_size_1".to_string(),
                kind: ConstraintKind::FileSize { max_bytes: 5120 },
                source: ConstraintSource::Extracted,
                original_text: "under 5KB".to_string(),
            }],
        }
        .save(&turn)
        .unwrap();

        let catalog = ToolCatalog::new();
        catalog.register("file.write", Arc::new(EchoTool), ToolMode::Any, "", false).await;
        let executor = executor_with(catalog).await;

        let outcome = executor
            .execute_single(
                "file.write",
                json!({"path": "r.md", "content": "x".repeat(8000)}),
                &turn,
                &context(),
            )
            .await;

        assert!(outcome.is_blocked());
        assert!(outcome.description.contains("exceeds limit of 5120"));

        // Violation recorded in plan state
        let state = PlanStateManager.load(&turn).unwrap();
        assert_eq!(state.violations.len(), 1);
    }

    #[tokio::test]
    async fn test_enrichment_injects_standard_fields() {
        let (_temp, turn) = setup_turn();
        let catalog = ToolCatalog::new();
        catalog.register("internet.research", Arc::new(EchoTool), ToolMode::Any, "", false).await;
        let executor = executor_with(catalog).await;

        let outcome = executor
            .execute_single("internet.research", json!({}), &turn, &context())
            .await;

        let echoed = &outcome.raw_result["echo"];
        assert_eq!(echoed["query"], "cheapest Arduino Nano under $10");
        assert_eq!(echoed["session_id"], "sess-1");
        assert_eq!(echoed["turn_number"], 1);
        assert_eq!(echoed["research_context"]["user_purpose"], "purchase");
        assert!(echoed["research_context"]["intent"]
            .as_str()
            .unwrap()
            .contains("find product"));
    }

    #[tokio::test]
    async fn test_resolved_query_from_plan_section_preferred() {
        let (_temp, turn) = setup_turn();
        let catalog = ToolCatalog::new();
        catalog.register("internet.research", Arc::new(EchoTool), ToolMode::Any, "", false).await;
        let executor = executor_with(catalog).await;

        let mut doc = context();
        doc.append_section(3, "Plan", "**Resolved Query:** Arduino Nano v3 price comparison\n")
            .unwrap();

        let outcome = executor.execute_single("internet.research", json!({}), &turn, &doc).await;
        assert_eq!(outcome.resolved_query, "Arduino Nano v3 price comparison");
        assert_eq!(outcome.raw_result["echo"]["query"], "Arduino Nano v3 price comparison");
    }

    #[tokio::test]
    async fn test_claims_extracted_and_unsourced_rejected() {
        let (_temp, turn) = setup_turn();
        let catalog = ToolCatalog::new();
        catalog
            .register(
                "internet.research",
                Arc::new(FixedTool(json!({
                    "status": "success",
                    "claims": [
                        {"content": "Nano is $8.99", "confidence": 0.9, "url": "https://shop.example/nano"},
                        {"content": "unsourced rumor", "confidence": 0.9}
                    ]
                }))),
                ToolMode::Any,
                "",
                false,
            )
            .await;
        let executor = executor_with(catalog).await;

        let outcome = executor.execute_single("internet.research", json!({}), &turn, &context()).await;
        assert_eq!(outcome.claims.len(), 1);
        assert_eq!(outcome.rejected_claims, 1);
        assert_eq!(outcome.claims[0].url.as_deref(), Some("https://shop.example/nano"));
    }

    #[tokio::test]
    async fn test_denied_by_gate() {
        let (_temp, turn) = setup_turn();
        let catalog = ToolCatalog::new();
        catalog.register("git.push", Arc::new(EchoTool), ToolMode::Any, "", false).await;
        let executor = ToolExecutor::new(
            Arc::new(catalog),
            PermissionGate::new(vec!["git.push".to_string()], vec![]),
            Arc::new(ApprovalBroker::new()),
        );

        let outcome = executor.execute_single("git.push", json!({}), &turn, &context()).await;
        assert_eq!(outcome.status, "denied");
    }

    #[tokio::test]
    async fn test_approval_timeout_is_denial() {
        let (_temp, turn) = setup_turn();
        let catalog = ToolCatalog::new();
        catalog.register("file.write", Arc::new(EchoTool), ToolMode::Any, "", false).await;
        let executor = ToolExecutor::new(
            Arc::new(catalog),
            PermissionGate::new(vec![], vec!["file.write".to_string()]),
            Arc::new(ApprovalBroker::new()),
        )
        .with_approval_timeout(Duration::from_millis(30));

        let outcome = executor.execute_single("file.write", json!({}), &turn, &context()).await;
        assert_eq!(outcome.status, "denied");
        assert_eq!(outcome.description, "approval_denied");
    }

    #[tokio::test]
    async fn test_plan_halts_on_blocked_step() {
        let (_temp, turn) = setup_turn();
        crate::constraints::ConstraintSet {
            constraints: vec![Constraint {
                id: "privacy_1".to_string(),
                kind: ConstraintKind::Privacy {
                    no_external_calls: true,
                },
                source: ConstraintSource::Extracted,
                original_text: "no external calls".to_string(),
            }],
        }
        .save(&turn)
        .unwrap();

        let catalog = ToolCatalog::new();
        catalog.register("memory.search", Arc::new(EchoTool), ToolMode::Any, "", false).await;
        catalog.register("internet.research", Arc::new(EchoTool), ToolMode::Any, "", false).await;
        let executor = executor_with(catalog).await;

        let steps = vec![
            json!({"tool": "memory.search", "args": {"q": "budget"}}),
            json!({"tool": "internet.research", "args": {}}),
            json!({"tool": "memory.search", "args": {"q": "again"}}),
        ];
        let outcomes = executor.execute_plan(&steps, &turn, &context()).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_blocked());
    }
}
