//! Tool-level constraint checking
//!
//! Shared by the tool executor's pre-call path and the validator. A
//! violation blocks the call before it reaches the tool.

use serde_json::Value;
use tracing::debug;

use super::types::{ConstraintKind, ConstraintSet};

/// A constraint violation with attribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub constraint_id: String,
    pub reason: String,
}

/// Check a tool call against the constraint set
///
/// Returns the first violation found, or `None` when the call may proceed.
pub fn check_tool_call(tool_name: &str, args: &Value, constraints: &ConstraintSet) -> Option<Violation> {
    if constraints.is_empty() {
        return None;
    }

    let blob = format!("{} {}", tool_name, args).to_lowercase();

    for constraint in &constraints.constraints {
        match &constraint.kind {
            ConstraintKind::BlockedTools { tools } => {
                if tools.iter().any(|t| t == tool_name) {
                    return Some(Violation {
                        constraint_id: constraint.id.clone(),
                        reason: format!("Tool '{}' is blocked by constraints", tool_name),
                    });
                }
            }
            ConstraintKind::BlockedDomains { domains } => {
                for domain in domains {
                    if blob.contains(&domain.to_lowercase()) {
                        return Some(Violation {
                            constraint_id: constraint.id.clone(),
                            reason: format!("Call references blocked domain: {}", domain),
                        });
                    }
                }
            }
            ConstraintKind::FileSize { max_bytes } => {
                if tool_name == "file.write" {
                    let content_bytes = args
                        .get("content")
                        .and_then(Value::as_str)
                        .map(|c| c.len() as u64)
                        .unwrap_or(0);
                    if content_bytes > *max_bytes {
                        debug!(content_bytes, max_bytes, "check_tool_call: file size violation");
                        return Some(Violation {
                            constraint_id: constraint.id.clone(),
                            reason: format!(
                                "file.write content is {} bytes, exceeds limit of {} bytes ({})",
                                content_bytes, max_bytes, constraint.original_text
                            ),
                        });
                    }
                }
            }
            ConstraintKind::Privacy { no_external_calls } => {
                if *no_external_calls && (tool_name.starts_with("internet.") || tool_name.starts_with("browser.")) {
                    return Some(Violation {
                        constraint_id: constraint.id.clone(),
                        reason: "External calls forbidden by privacy constraint".to_string(),
                    });
                }
            }
            ConstraintKind::MustAvoid { terms } => {
                for term in terms {
                    let term = term.to_lowercase();
                    if !term.is_empty() && blob.contains(&term) {
                        return Some(Violation {
                            constraint_id: constraint.id.clone(),
                            reason: format!("Must-avoid constraint matched: {}", term),
                        });
                    }
                }
            }
            // Budget, time, availability, and location are enforced by the
            // validator against results, not at call time
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::types::{Constraint, ConstraintSource};
    use serde_json::json;

    fn set_with(kind: ConstraintKind) -> ConstraintSet {
        ConstraintSet {
            constraints: vec![Constraint {
                id: "c1".to_string(),
                kind,
                source: ConstraintSource::Extracted,
                original_text: "original".to_string(),
            }],
        }
    }

    #[test]
    fn test_empty_set_allows_everything() {
        assert!(check_tool_call("internet.research", &json!({}), &ConstraintSet::default()).is_none());
    }

    #[test]
    fn test_blocked_tool() {
        let set = set_with(ConstraintKind::BlockedTools {
            tools: vec!["git.push".to_string()],
        });
        let violation = check_tool_call("git.push", &json!({}), &set).unwrap();
        assert!(violation.reason.contains("git.push"));
        assert!(check_tool_call("git.commit", &json!({}), &set).is_none());
    }

    #[test]
    fn test_blocked_domain_in_args() {
        let set = set_with(ConstraintKind::BlockedDomains {
            domains: vec!["sketchy.example".to_string()],
        });
        let args = json!({"query": "prices at sketchy.example please"});
        assert!(check_tool_call("internet.research", &args, &set).is_some());
    }

    #[test]
    fn test_file_write_over_limit_blocked() {
        let set = set_with(ConstraintKind::FileSize { max_bytes: 5120 });
        let args = json!({"path": "report.md", "content": "x".repeat(8000)});

        let violation = check_tool_call("file.write", &args, &set).unwrap();
        assert!(violation.reason.contains("exceeds limit of 5120"));
    }

    #[test]
    fn test_file_write_under_limit_allowed() {
        let set = set_with(ConstraintKind::FileSize { max_bytes: 5120 });
        let args = json!({"path": "report.md", "content": "x".repeat(4000)});
        assert!(check_tool_call("file.write", &args, &set).is_none());
    }

    #[test]
    fn test_file_size_only_gates_file_write() {
        let set = set_with(ConstraintKind::FileSize { max_bytes: 10 });
        let args = json!({"content": "a much longer payload than ten bytes"});
        assert!(check_tool_call("memory.save", &args, &set).is_none());
    }

    #[test]
    fn test_privacy_blocks_internet_and_browser() {
        let set = set_with(ConstraintKind::Privacy {
            no_external_calls: true,
        });
        assert!(check_tool_call("internet.research", &json!({}), &set).is_some());
        assert!(check_tool_call("browser.navigate", &json!({}), &set).is_some());
        assert!(check_tool_call("memory.search", &json!({}), &set).is_none());
    }

    #[test]
    fn test_must_avoid_term_matches_blob() {
        let set = set_with(ConstraintKind::MustAvoid {
            terms: vec!["Aliexpress".to_string()],
        });
        let args = json!({"query": "nano clones on aliexpress"});
        let violation = check_tool_call("internet.research", &args, &set).unwrap();
        assert!(violation.reason.contains("aliexpress"));
    }

    #[test]
    fn test_budget_not_enforced_at_call_time() {
        let set = set_with(ConstraintKind::Budget { max_amount: 10.0 });
        assert!(check_tool_call("internet.research", &json!({"query": "$999 item"}), &set).is_none());
    }
}
