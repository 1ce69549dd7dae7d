//! ValidationController - validate, override, revise, retry

use serde_json::json;
use tracing::{debug, info, warn};

use contextdoc::ContextDocument;
use turnstore::{PathType, TurnDirectory};

use crate::config::ValidationConfig;
use crate::llm::Role;
use crate::loops::LoopServices;
use crate::planning::PlanStateManager;

use super::crosscheck::crosscheck_response;
use super::result::{Decision, FailureContext, ValidationResult};

const PHASE: &str = "phase7_validation";

/// Runs validation passes and applies retry bookkeeping
pub struct ValidationController<'a> {
    services: &'a LoopServices,
    config: ValidationConfig,
    plan_state: PlanStateManager,
}

impl<'a> ValidationController<'a> {
    pub fn new(services: &'a LoopServices, config: ValidationConfig) -> Self {
        Self {
            services,
            config,
            plan_state: PlanStateManager,
        }
    }

    /// Validate a draft response
    ///
    /// Runs the validator LLM, folds in deterministic URL/price checks,
    /// and applies the override rules: an APPROVE with low confidence,
    /// missing query terms, or term substitution becomes a RETRY.
    pub async fn validate(
        &self,
        draft: &str,
        doc: &mut ContextDocument,
        turn_dir: &TurnDirectory,
        retry_count: u32,
        max_retries: u32,
    ) -> ValidationResult {
        let extra = format!("## Draft Response\n\n{}", draft);
        let mut result = match self
            .services
            .llm_call("validator", Role::Reflex, doc, turn_dir, PHASE, Some(&extra))
            .await
        {
            Ok(response) => ValidationResult::parse(&response),
            Err(e) => {
                warn!("[Validation] Validator call failed: {}", e);
                ValidationResult::unparseable()
            }
        };
        result.retry_count = retry_count;

        // Deterministic cross-checks outrank the LLM's verdict
        let report = crosscheck_response(draft, doc, turn_dir, self.config.price_tolerance);
        result.urls_verified = report.urls_verified;
        result.prices_checked = report.prices_checked;

        if !report.is_clean() && result.decision.is_approval() {
            info!(
                "[Validation] Overriding {} -> RETRY ({} failed urls, {} price mismatches)",
                result.decision,
                report.failed_urls.len(),
                report.price_mismatches.len()
            );
            result.decision = Decision::Retry;
        }

        if !report.failed_urls.is_empty() || !report.price_mismatches.is_empty() {
            let context = result.failure_context.get_or_insert_with(FailureContext::default);
            if context.reason.is_empty() {
                context.reason = if report.failed_urls.is_empty() {
                    "PRICE_STALE".to_string()
                } else {
                    "URL_NOT_IN_RESEARCH".to_string()
                };
            }
            for url in report.failed_urls {
                if !context.failed_urls.contains(&url) {
                    context.failed_urls.push(url);
                }
            }
            context
                .mismatches
                .extend(report.price_mismatches.iter().map(|m| json!({"price": m})));
        }

        // Confidence and term-check overrides
        if result.decision == Decision::Approve {
            let terms_missing = result.checks.query_terms_in_context == Some(false);
            let substitution = result.checks.no_term_substitution == Some(false);
            if result.confidence < self.config.confidence_threshold || terms_missing || substitution {
                info!(
                    "[Validation] Overriding APPROVE -> RETRY (confidence={}, terms_missing={}, substitution={})",
                    result.confidence, terms_missing, substitution
                );
                result.decision = Decision::Retry;
                let context = result.failure_context.get_or_insert_with(FailureContext::default);
                context.reason = "confidence_override".to_string();
            }
        }

        if let Some(context) = &mut result.failure_context {
            context.retry_count = retry_count + 1;
            context.max_retries = max_retries;
        }

        // Constraint feedback flows into plan state
        if let Err(e) = self
            .plan_state
            .update_from_validation(turn_dir, result.checks.constraints_respected)
        {
            warn!("[Validation] Failed to update plan state: {}", e);
        }
        if !result.goal_statuses.is_empty() {
            let statuses: Vec<(String, String)> = result
                .goal_statuses
                .iter()
                .map(|g| (g.goal_id.clone(), g.status.clone()))
                .collect();
            if let Err(e) = self.plan_state.update_goal_statuses(turn_dir, &statuses) {
                warn!("[Validation] Failed to update goal statuses: {}", e);
            }
        }

        debug!(decision = %result.decision, confidence = result.confidence, "ValidationController::validate: result");
        result
    }

    /// Produce a revised response via the dedicated revision recipe
    pub async fn revise(
        &self,
        draft: &str,
        hints: &str,
        doc: &ContextDocument,
        turn_dir: &TurnDirectory,
    ) -> Option<String> {
        let extra = format!("## Draft Response\n\n{}\n\n## Revision Hints\n\n{}", draft, hints);
        match self
            .services
            .llm_call("revision", Role::Voice, doc, turn_dir, PHASE, Some(&extra))
            .await
        {
            Ok(revised) if !revised.trim().is_empty() => Some(revised),
            Ok(_) => None,
            Err(e) => {
                warn!("[Validation] Revision call failed: {}", e);
                None
            }
        }
    }

    /// Apply RETRY bookkeeping
    ///
    /// Archives the attempt directory, writes `retry_context.json` with
    /// the URLs to skip, and invalidates the failed claims.
    pub fn apply_retry(
        &self,
        result: &ValidationResult,
        doc: &mut ContextDocument,
        turn_dir: &TurnDirectory,
        attempt: u32,
    ) -> eyre::Result<Vec<String>> {
        let archived = turn_dir.archive_attempt(attempt)?;
        info!("[Validation] Archived attempt_{} ({} files)", attempt, archived.len());

        let failed_urls = result
            .failure_context
            .as_ref()
            .map(|c| c.failed_urls.clone())
            .unwrap_or_default();
        let retry_context = json!({
            "reason": result.failure_context.as_ref().map(|c| c.reason.clone()).unwrap_or_default(),
            "failed_urls": failed_urls,
            "suggested_fixes": result.failure_context.as_ref().map(|c| c.suggested_fixes.clone()).unwrap_or_default(),
            "retry_count": result.failure_context.as_ref().map(|c| c.retry_count).unwrap_or(0),
            "issues": result.issues,
        });
        std::fs::write(
            turn_dir.doc_path("retry_context.json", PathType::Turn),
            serde_json::to_string_pretty(&retry_context)?,
        )?;

        let invalidated = doc.claims.invalidate_by_urls(&failed_urls);
        if invalidated > 0 {
            info!("[Validation] Invalidated {} claims", invalidated);
        }

        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loops::testing::services_with_llm;
    use contextdoc::Mode;
    use serde_json::json;
    use turnstore::create_turn_directory;

    fn doc_with_evidence() -> ContextDocument {
        let mut doc = ContextDocument::new("cheapest Arduino Nano under $10", "s", 1, Mode::Chat, "t");
        doc.claims
            .add(contextdoc::Claim {
                content: "Nano is $8.99".to_string(),
                confidence: 0.9,
                source: "internet.research".to_string(),
                ttl_hours: 24,
                url: Some("https://shop.example/nano".to_string()),
                source_ref: None,
            })
            .unwrap();
        doc.append_section(2, "Context", "gathered evidence with $8.99").unwrap();
        doc
    }

    fn approve(confidence: f64) -> String {
        json!({
            "decision": "APPROVE",
            "confidence": confidence,
            "checks": {"query_terms_in_context": true, "no_term_substitution": true, "constraints_respected": true}
        })
        .to_string()
    }

    fn setup(responses: Vec<String>) -> (tempfile::TempDir, TurnDirectory, crate::loops::LoopServices) {
        let temp = tempfile::tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "t", "s", "chat").unwrap();
        let services = services_with_llm(responses, temp.path().join("recipes"));
        (temp, turn, services)
    }

    #[tokio::test]
    async fn test_approve_with_verified_url_stands() {
        let (_temp, turn, services) = setup(vec![approve(0.9)]);
        let controller = ValidationController::new(&services, ValidationConfig::default());
        let mut doc = doc_with_evidence();

        let result = controller
            .validate("The Nano is $8.99 at https://shop.example/nano", &mut doc, &turn, 0, 3)
            .await;

        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(result.urls_verified, 1);
        assert!(result.prices_checked >= 1);
    }

    #[tokio::test]
    async fn test_unknown_url_overrides_approve() {
        let (_temp, turn, services) = setup(vec![approve(0.9)]);
        let controller = ValidationController::new(&services, ValidationConfig::default());
        let mut doc = doc_with_evidence();

        let result = controller
            .validate("See https://example.com/x for details", &mut doc, &turn, 0, 3)
            .await;

        assert_eq!(result.decision, Decision::Retry);
        let context = result.failure_context.unwrap();
        assert_eq!(context.failed_urls, vec!["https://example.com/x"]);
        assert_eq!(context.reason, "URL_NOT_IN_RESEARCH");
    }

    #[tokio::test]
    async fn test_low_confidence_approve_overridden() {
        let (_temp, turn, services) = setup(vec![approve(0.4)]);
        let controller = ValidationController::new(&services, ValidationConfig::default());
        let mut doc = doc_with_evidence();

        let result = controller.validate("plain answer, no urls", &mut doc, &turn, 0, 3).await;

        assert_eq!(result.decision, Decision::Retry);
        assert_eq!(result.failure_context.unwrap().reason, "confidence_override");
    }

    #[tokio::test]
    async fn test_term_substitution_overridden() {
        let response = json!({
            "decision": "APPROVE",
            "confidence": 0.9,
            "checks": {"query_terms_in_context": true, "no_term_substitution": false}
        })
        .to_string();
        let (_temp, turn, services) = setup(vec![response]);
        let controller = ValidationController::new(&services, ValidationConfig::default());
        let mut doc = doc_with_evidence();

        let result = controller.validate("answer about Arduino Uno", &mut doc, &turn, 0, 3).await;
        assert_eq!(result.decision, Decision::Retry);
    }

    #[tokio::test]
    async fn test_apply_retry_archives_and_invalidates() {
        let (_temp, turn, services) = setup(vec![]);
        let controller = ValidationController::new(&services, ValidationConfig::default());
        let mut doc = doc_with_evidence();
        std::fs::write(turn.path.join("context.md"), doc.get_markdown()).unwrap();

        let result = ValidationResult {
            failure_context: Some(FailureContext {
                reason: "URL_NOT_IN_RESEARCH".to_string(),
                failed_urls: vec!["https://shop.example/nano".to_string()],
                retry_count: 1,
                max_retries: 3,
                ..Default::default()
            }),
            ..ValidationResult::unparseable()
        };

        let archived = controller.apply_retry(&result, &mut doc, &turn, 1).unwrap();
        assert!(archived.contains(&"context.md".to_string()));
        assert!(turn.path.join("attempt_1/context.md").exists());
        assert!(turn.path.join("retry_context.json").exists());
        assert_eq!(doc.claims.len(), 0);

        let retry_context: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(turn.path.join("retry_context.json")).unwrap()).unwrap();
        assert_eq!(retry_context["failed_urls"][0], "https://shop.example/nano");
    }

    #[tokio::test]
    async fn test_revise_returns_new_text() {
        let (_temp, turn, services) = setup(vec!["revised answer without the bad url".to_string()]);
        let controller = ValidationController::new(&services, ValidationConfig::default());
        let doc = doc_with_evidence();
        // revision recipe needs context.md on disk
        std::fs::write(turn.path.join("context.md"), doc.get_markdown()).unwrap();

        let revised = controller.revise("old draft", "drop the url", &doc, &turn).await;
        assert_eq!(revised.unwrap(), "revised answer without the bad url");
    }
}
