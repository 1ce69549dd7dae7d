//! Phase 6 - synthesis
//!
//! The Voice role writes the final answer from the assembled context
//! document. Responses arrive as JSON with an answer and a validation
//! checklist, as plain text, or as an explicit `_type: INVALID` refusal.

use serde_json::Value;
use tracing::{info, warn};

use contextdoc::ContextDocument;
use turnstore::TurnDirectory;

use crate::llm::Role;
use crate::loops::LoopServices;
use crate::planning::extract_json;

const PHASE: &str = "phase6_synthesis";

/// Reasons that read as research failure in an INVALID refusal
const RESEARCH_FAILURE_MARKERS: [&str; 4] = ["research", "no findings", "no results", "nothing usable"];

/// Result of one synthesis pass
#[derive(Debug, Clone)]
pub enum SynthesisOutcome {
    /// A usable draft answer
    Answer {
        answer: String,
        validation_checklist: Vec<String>,
    },
    /// The synthesizer refused for a research-failure reason: surface a
    /// polite message instead of retrying
    ResearchFailure { reason: String },
    /// The synthesizer refused for any other reason: force a retry
    Invalid { reason: String },
    /// The call itself failed
    CallFailed { error: String },
}

/// Run synthesis and write §6
pub async fn run_synthesis(
    services: &LoopServices,
    doc: &mut ContextDocument,
    turn_dir: &TurnDirectory,
) -> SynthesisOutcome {
    let response = match services
        .llm_call("synthesizer", Role::Voice, doc, turn_dir, PHASE, None)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!("[Synthesis] Call failed: {}", e);
            return SynthesisOutcome::CallFailed { error: e.to_string() };
        }
    };

    let outcome = match extract_json(&response) {
        Some(payload) if payload.get("_type").and_then(Value::as_str) == Some("INVALID") => {
            let reason = payload
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_string();
            let lower = reason.to_lowercase();
            if RESEARCH_FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
                info!("[Synthesis] INVALID with research-failure reason: {}", reason);
                SynthesisOutcome::ResearchFailure { reason }
            } else {
                warn!("[Synthesis] INVALID: {}", reason);
                SynthesisOutcome::Invalid { reason }
            }
        }
        Some(payload) => {
            let answer = payload
                .get("answer")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| response.clone());
            let validation_checklist = payload
                .get("validation_checklist")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default();
            SynthesisOutcome::Answer {
                answer,
                validation_checklist,
            }
        }
        // Plain text responses are taken as the answer
        None => SynthesisOutcome::Answer {
            answer: response,
            validation_checklist: Vec::new(),
        },
    };

    if let SynthesisOutcome::Answer { answer, .. } = &outcome {
        doc.append_section(6, "Synthesis", answer).ok();
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loops::testing::services_with_llm;
    use contextdoc::Mode;
    use serde_json::json;
    use turnstore::create_turn_directory;

    async fn run(response: String) -> (SynthesisOutcome, ContextDocument) {
        let temp = tempfile::tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "t", "s", "chat").unwrap();
        let services = services_with_llm(vec![response], temp.path().join("recipes"));
        let mut doc = ContextDocument::new("q", "s", 1, Mode::Chat, "t");
        let outcome = run_synthesis(&services, &mut doc, &turn).await;
        (outcome, doc)
    }

    #[tokio::test]
    async fn test_json_answer_with_checklist() {
        let response = json!({
            "answer": "The Nano is $8.99 at https://shop.example/nano",
            "validation_checklist": ["https://shop.example/nano", "$8.99"]
        })
        .to_string();

        let (outcome, doc) = run(response).await;
        match outcome {
            SynthesisOutcome::Answer {
                answer,
                validation_checklist,
            } => {
                assert!(answer.contains("$8.99"));
                assert_eq!(validation_checklist.len(), 2);
            }
            other => panic!("expected answer, got {:?}", other),
        }
        assert!(doc.get_section(6).unwrap().contains("$8.99"));
    }

    #[tokio::test]
    async fn test_plain_text_passthrough() {
        let (outcome, doc) = run("Just a plain answer.".to_string()).await;
        match outcome {
            SynthesisOutcome::Answer { answer, .. } => assert_eq!(answer, "Just a plain answer."),
            other => panic!("expected answer, got {:?}", other),
        }
        assert!(doc.has_section(6));
    }

    #[tokio::test]
    async fn test_invalid_research_failure_short_circuits() {
        let response = json!({"_type": "INVALID", "reason": "research returned no usable findings"}).to_string();
        let (outcome, doc) = run(response).await;
        assert!(matches!(outcome, SynthesisOutcome::ResearchFailure { .. }));
        assert!(!doc.has_section(6));
    }

    #[tokio::test]
    async fn test_invalid_other_reason_forces_retry() {
        let response = json!({"_type": "INVALID", "reason": "context is self-contradictory"}).to_string();
        let (outcome, _doc) = run(response).await;
        assert!(matches!(outcome, SynthesisOutcome::Invalid { .. }));
    }
}
