//! Loop safeguards - research guard, circular-call detection, command dedupe

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use serde_json::Value;
use tracing::{debug, warn};

/// Stable hash of a tool's args for call-history comparison
pub fn hash_args(args: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    args.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Refuses duplicate research calls and tracks exhaustion
///
/// A second `internet.research` with the same query is refused; research
/// is marked exhausted after any attempt returns zero findings.
#[derive(Debug, Default)]
pub struct ResearchGuard {
    queries_seen: HashSet<String>,
    exhausted: bool,
}

impl ResearchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a research query; `Err` carries the refusal reason
    pub fn check(&mut self, query: &str) -> Result<(), String> {
        if self.exhausted {
            return Err("research exhausted: a prior attempt returned no findings".to_string());
        }
        let normalized = query.trim().to_lowercase();
        if !self.queries_seen.insert(normalized) {
            warn!(%query, "ResearchGuard: duplicate research query refused");
            return Err("already called with same query".to_string());
        }
        Ok(())
    }

    /// Report an attempt's finding count
    pub fn record_findings(&mut self, count: usize) {
        if count == 0 {
            debug!("ResearchGuard: zero findings, marking research exhausted");
            self.exhausted = true;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Detects A->A->A and A->B->A->B call patterns
#[derive(Debug, Default)]
pub struct CircularCallDetector {
    history: Vec<(String, u64)>,
}

impl CircularCallDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call and report whether a cycle just completed
    ///
    /// Fires when the last four entries satisfy
    /// `steps[i] == steps[i+2] && steps[i+1] == steps[i+3]` (which also
    /// covers three identical calls in a row).
    pub fn record(&mut self, tool: &str, args: &Value) -> bool {
        self.history.push((tool.to_string(), hash_args(args)));

        let n = self.history.len();
        if n >= 4 {
            let window = &self.history[n - 4..];
            if window[0] == window[2] && window[1] == window[3] {
                warn!(%tool, "CircularCallDetector: A->B->A->B pattern detected");
                return true;
            }
        }
        if n >= 3 {
            let window = &self.history[n - 3..];
            if window[0] == window[1] && window[1] == window[2] {
                warn!(%tool, "CircularCallDetector: A->A->A pattern detected");
                return true;
            }
        }
        false
    }
}

/// Exact-duplicate command tracking for the executor loop
#[derive(Debug, Default)]
pub struct CommandLedger {
    seen: HashSet<String>,
}

impl CommandLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the exact command was already issued
    pub fn record(&mut self, command: &str) -> bool {
        self.seen.insert(command.trim().to_string())
    }
}

/// Heuristic: does a natural-language command look like a search?
pub fn looks_like_search(command: &str) -> bool {
    let lower = command.to_lowercase();
    ["search", "find", "research", "look up", "lookup", "price", "cheapest"]
        .iter()
        .any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_research_guard_refuses_duplicate_query() {
        let mut guard = ResearchGuard::new();
        assert!(guard.check("arduino nano price").is_ok());
        let err = guard.check("Arduino Nano Price").unwrap_err();
        assert_eq!(err, "already called with same query");
        assert!(guard.check("different query").is_ok());
    }

    #[test]
    fn test_research_guard_exhaustion() {
        let mut guard = ResearchGuard::new();
        guard.check("q1").unwrap();
        guard.record_findings(3);
        assert!(!guard.is_exhausted());

        guard.record_findings(0);
        assert!(guard.is_exhausted());
        assert!(guard.check("q2").is_err());
    }

    #[test]
    fn test_circular_abab() {
        let mut detector = CircularCallDetector::new();
        assert!(!detector.record("a", &json!({"x": 1})));
        assert!(!detector.record("b", &json!({"y": 2})));
        assert!(!detector.record("a", &json!({"x": 1})));
        assert!(detector.record("b", &json!({"y": 2})));
    }

    #[test]
    fn test_circular_aaa() {
        let mut detector = CircularCallDetector::new();
        assert!(!detector.record("a", &json!({})));
        assert!(!detector.record("a", &json!({})));
        assert!(detector.record("a", &json!({})));
    }

    #[test]
    fn test_same_tool_different_args_is_not_circular() {
        let mut detector = CircularCallDetector::new();
        assert!(!detector.record("a", &json!({"q": 1})));
        assert!(!detector.record("a", &json!({"q": 2})));
        assert!(!detector.record("a", &json!({"q": 3})));
        assert!(!detector.record("a", &json!({"q": 4})));
    }

    #[test]
    fn test_four_step_window_property() {
        // Any window where steps[i]==steps[i+2] and steps[i+1]==steps[i+3] fires
        let mut detector = CircularCallDetector::new();
        detector.record("x", &json!({}));
        detector.record("a", &json!({"p": 1}));
        detector.record("b", &json!({}));
        detector.record("a", &json!({"p": 1}));
        assert!(detector.record("b", &json!({})));
    }

    #[test]
    fn test_command_ledger() {
        let mut ledger = CommandLedger::new();
        assert!(ledger.record("search for nano"));
        assert!(!ledger.record("search for nano"));
        assert!(!ledger.record("  search for nano  "));
        assert!(ledger.record("another command"));
    }

    #[test]
    fn test_looks_like_search() {
        assert!(looks_like_search("Search for the cheapest Arduino Nano"));
        assert!(looks_like_search("find vendor prices"));
        assert!(!looks_like_search("summarize the findings so far"));
    }
}
