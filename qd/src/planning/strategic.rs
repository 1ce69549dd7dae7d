//! Strategic plan parsing and routing

use serde_json::Value;
use tracing::debug;

/// Routing destination selected by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Synthesis,
    Executor,
    Clarify,
    Brainstorm,
    RefreshContext,
    SelfExtension,
}

impl Route {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synthesis" => Some(Self::Synthesis),
            "executor" => Some(Self::Executor),
            "clarify" => Some(Self::Clarify),
            "brainstorm" => Some(Self::Brainstorm),
            "refresh_context" => Some(Self::RefreshContext),
            "self_extension" => Some(Self::SelfExtension),
            _ => None,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Synthesis => "synthesis",
            Self::Executor => "executor",
            Self::Clarify => "clarify",
            Self::Brainstorm => "brainstorm",
            Self::RefreshContext => "refresh_context",
            Self::SelfExtension => "self_extension",
        };
        write!(f, "{}", s)
    }
}

/// The planner's structured output
#[derive(Debug, Clone)]
pub struct StrategicPlan {
    pub route: Route,
    pub goals: Vec<Value>,
    pub resolved_query: Option<String>,
    pub reasoning: String,
    pub missing_tools: Vec<String>,

    /// The full plan JSON, persisted as the ticket for non-executor routes
    pub raw: Value,
}

impl StrategicPlan {
    /// Parse an LLM response as a strategic plan
    ///
    /// Returns `None` when the response is not `_type: STRATEGIC_PLAN`;
    /// the caller then falls back to the legacy loop.
    pub fn parse(response: &str) -> Option<Self> {
        let raw: Value = extract_json(response)?;
        if raw.get("_type").and_then(Value::as_str) != Some("STRATEGIC_PLAN") {
            debug!("StrategicPlan::parse: not a STRATEGIC_PLAN payload");
            return None;
        }

        let route_str = raw.get("route_to").and_then(Value::as_str).unwrap_or("synthesis");
        let route = Route::parse(route_str)?;

        // Legacy planners signaled self-extension through plan_type
        let route = if raw.get("plan_type").and_then(Value::as_str) == Some("self_extend") {
            Route::SelfExtension
        } else {
            route
        };

        Some(Self {
            route,
            goals: raw.get("goals").and_then(Value::as_array).cloned().unwrap_or_default(),
            resolved_query: raw
                .get("resolved_query")
                .and_then(Value::as_str)
                .map(String::from)
                .filter(|q| !q.is_empty()),
            reasoning: raw
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            missing_tools: raw
                .get("missing_tools")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default(),
            raw,
        })
    }
}

/// Pull the first JSON object out of an LLM response
///
/// Tolerates fenced code blocks and prose around the object.
pub fn extract_json(response: &str) -> Option<Value> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    // Fenced block
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(value);
            }
        }
    }

    // First balanced object
    let start = trimmed.find('{')?;
    let bytes = trimmed.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&trimmed[start..=start + offset]).ok();
                }
            }
            _ => {}
        }
    }
    None
}
