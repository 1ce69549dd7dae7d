//! Phase 1.5 - the reflection gate
//!
//! A fast Reflex-band classifier: PROCEED or CLARIFY. CLARIFY short-
//! circuits the whole pipeline with a question for the user.

use serde_json::Value;
use tracing::{info, warn};

use contextdoc::ContextDocument;
use turnstore::TurnDirectory;

use crate::llm::Role;
use crate::loops::LoopServices;
use crate::planning::extract_json;

const PHASE: &str = "phase1_5_validation";

/// Gate outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionDecision {
    Proceed,
    Clarify {
        reason: String,
        clarification_question: String,
    },
}

/// Run the reflection gate and write §1
pub async fn run_reflection(
    services: &LoopServices,
    doc: &mut ContextDocument,
    turn_dir: &TurnDirectory,
) -> ReflectionDecision {
    let response = match services
        .llm_call("reflection", Role::Reflex, doc, turn_dir, PHASE, None)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            // The gate is advisory; an unavailable classifier never blocks
            warn!("[Reflection] Gate call failed, proceeding: {}", e);
            doc.append_section(1, "Validation", "**Gate:** PROCEED (classifier unavailable)").ok();
            return ReflectionDecision::Proceed;
        }
    };

    let decision = extract_json(&response)
        .and_then(|payload| {
            let decision = payload.get("decision").and_then(Value::as_str)?.to_string();
            if decision == "CLARIFY" {
                Some(ReflectionDecision::Clarify {
                    reason: payload
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("query cannot be acted on")
                        .to_string(),
                    clarification_question: payload
                        .get("clarification_question")
                        .and_then(Value::as_str)
                        .unwrap_or("Could you clarify what you need?")
                        .to_string(),
                })
            } else {
                Some(ReflectionDecision::Proceed)
            }
        })
        .unwrap_or(ReflectionDecision::Proceed);

    match &decision {
        ReflectionDecision::Proceed => {
            info!("[Reflection] PROCEED");
            doc.append_section(1, "Validation", "**Gate:** PROCEED").ok();
        }
        ReflectionDecision::Clarify {
            reason,
            clarification_question,
        } => {
            info!("[Reflection] CLARIFY: {}", reason);
            doc.append_section(
                1,
                "Validation",
                &format!("**Gate:** CLARIFY\n**Reason:** {}\n**Question:** {}", reason, clarification_question),
            )
            .ok();
        }
    }
    decision
}
