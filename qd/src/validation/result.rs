//! Validation result types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::planning::extract_json;

/// The validator's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    ApprovePartial,
    Revise,
    Retry,
    Fail,
}

impl Decision {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVE" => Some(Self::Approve),
            "APPROVE_PARTIAL" => Some(Self::ApprovePartial),
            "REVISE" => Some(Self::Revise),
            "RETRY" => Some(Self::Retry),
            "FAIL" => Some(Self::Fail),
            _ => None,
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, Self::Approve | Self::ApprovePartial)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approve => "APPROVE",
            Self::ApprovePartial => "APPROVE_PARTIAL",
            Self::Revise => "REVISE",
            Self::Retry => "RETRY",
            Self::Fail => "FAIL",
        };
        write!(f, "{}", s)
    }
}

/// Hallucination-indicator checks reported by the validator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checks {
    pub query_terms_in_context: Option<bool>,
    pub no_term_substitution: Option<bool>,
    pub constraints_respected: Option<bool>,
}

/// Per-goal verdict for multi-goal queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalStatus {
    pub goal_id: String,
    #[serde(default)]
    pub score: f64,
    /// `fulfilled` | `partial` | `unfulfilled`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Context a RETRY carries forward: what failed and what to do about it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureContext {
    pub reason: String,
    #[serde(default)]
    pub failed_urls: Vec<String>,
    #[serde(default)]
    pub failed_claims: Vec<Value>,
    #[serde(default)]
    pub mismatches: Vec<Value>,
    #[serde(default)]
    pub suggested_fixes: Vec<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Result of one validation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub decision: Decision,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_hints: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_context: Option<FailureContext>,
    #[serde(default)]
    pub checks: Checks,
    #[serde(default)]
    pub goal_statuses: Vec<GoalStatus>,
    pub urls_verified: u32,
    pub prices_checked: u32,
    pub retry_count: u32,
}

impl ValidationResult {
    /// Fallback result when the validator response cannot be parsed
    pub fn unparseable() -> Self {
        Self {
            decision: Decision::Retry,
            confidence: 0.0,
            issues: vec!["validator response unparseable".to_string()],
            revision_hints: None,
            failure_context: Some(FailureContext {
                reason: "LLM_VALIDATION_RETRY".to_string(),
                ..Default::default()
            }),
            checks: Checks::default(),
            goal_statuses: Vec::new(),
            urls_verified: 0,
            prices_checked: 0,
            retry_count: 0,
        }
    }

    /// Parse a validator LLM response
    pub fn parse(response: &str) -> Self {
        let Some(payload) = extract_json(response) else {
            return Self::unparseable();
        };
        let Some(decision) = payload.get("decision").and_then(Value::as_str).and_then(Decision::parse) else {
            return Self::unparseable();
        };

        let string_list = |key: &str| -> Vec<String> {
            payload
                .get(key)
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default()
        };

        let checks = payload
            .get("checks")
            .map(|c| Checks {
                query_terms_in_context: c.get("query_terms_in_context").and_then(Value::as_bool),
                no_term_substitution: c.get("no_term_substitution").and_then(Value::as_bool),
                constraints_respected: c.get("constraints_respected").and_then(Value::as_bool),
            })
            .unwrap_or_default();

        let goal_statuses = payload
            .get("goal_statuses")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|g| serde_json::from_value::<GoalStatus>(g.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        let failed_urls = string_list("failed_urls");
        let suggested_fixes = string_list("suggested_fixes");
        let failure_context = if decision == Decision::Retry || !failed_urls.is_empty() {
            Some(FailureContext {
                reason: "LLM_VALIDATION_RETRY".to_string(),
                failed_urls,
                suggested_fixes,
                ..Default::default()
            })
        } else {
            None
        };

        Self {
            decision,
            confidence: payload.get("confidence").and_then(Value::as_f64).unwrap_or(0.8),
            issues: string_list("issues"),
            revision_hints: payload.get("revision_hints").and_then(Value::as_str).map(String::from),
            failure_context,
            checks,
            goal_statuses,
            urls_verified: 0,
            prices_checked: 0,
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_approve() {
        let response = json!({
            "decision": "APPROVE",
            "confidence": 0.91,
            "issues": [],
            "checks": {"query_terms_in_context": true, "no_term_substitution": true, "constraints_respected": true}
        })
        .to_string();

        let result = ValidationResult::parse(&response);
        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(result.confidence, 0.91);
        assert_eq!(result.checks.query_terms_in_context, Some(true));
        assert!(result.failure_context.is_none());
    }

    #[test]
    fn test_parse_retry_builds_failure_context() {
        let response = json!({
            "decision": "RETRY",
            "confidence": 0.3,
            "issues": ["url not found"],
            "failed_urls": ["https://example.com/x"],
            "suggested_fixes": ["use a different vendor"]
        })
        .to_string();

        let result = ValidationResult::parse(&response);
        assert_eq!(result.decision, Decision::Retry);
        let context = result.failure_context.unwrap();
        assert_eq!(context.failed_urls, vec!["https://example.com/x"]);
        assert_eq!(context.suggested_fixes, vec!["use a different vendor"]);
    }

    #[test]
    fn test_parse_goal_statuses() {
        let response = json!({
            "decision": "APPROVE_PARTIAL",
            "confidence": 0.8,
            "goal_statuses": [
                {"goal_id": "GOAL_1", "score": 1.0, "status": "fulfilled"},
                {"goal_id": "GOAL_2", "score": 0.2, "status": "unfulfilled"}
            ]
        })
        .to_string();

        let result = ValidationResult::parse(&response);
        assert_eq!(result.decision, Decision::ApprovePartial);
        assert!(result.decision.is_approval());
        assert_eq!(result.goal_statuses.len(), 2);
        assert_eq!(result.goal_statuses[1].status, "unfulfilled");
    }

    #[test]
    fn test_unparseable_becomes_retry() {
        let result = ValidationResult::parse("total nonsense");
        assert_eq!(result.decision, Decision::Retry);
        assert_eq!(result.confidence, 0.0);
        assert!(result.failure_context.is_some());
    }

    #[test]
    fn test_unknown_decision_becomes_retry() {
        let result = ValidationResult::parse(r#"{"decision": "MAYBE"}"#);
        assert_eq!(result.decision, Decision::Retry);
    }
}
