//! ToolCatalog - process-wide registry of named tool handlers

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use contextdoc::Mode;

use super::error::ToolError;

/// Mode gate on a registered tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    Code,
    Chat,
    #[default]
    Any,
}

impl ToolMode {
    /// Does a call in `mode` pass this gate?
    pub fn allows(&self, mode: Mode) -> bool {
        match self {
            Self::Any => true,
            Self::Code => mode == Mode::Code,
            Self::Chat => mode == Mode::Chat,
        }
    }

    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("code") => Self::Code,
            Some("chat") => Self::Chat,
            _ => Self::Any,
        }
    }
}

impl std::fmt::Display for ToolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Chat => write!(f, "chat"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// A tool callable: uniform `args -> result` contract
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// One catalog entry
#[derive(Clone)]
pub struct ToolRegistration {
    pub handler: Arc<dyn ToolHandler>,
    pub mode_required: ToolMode,
    pub description: String,
}

/// Process-wide tool registry
///
/// Reads take a shared snapshot; registration writes publish atomically,
/// so a concurrent reader sees the old catalog or the new one, never a
/// partial state.
#[derive(Default)]
pub struct ToolCatalog {
    tools: RwLock<HashMap<String, ToolRegistration>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; existing names are kept unless `override_existing`
    pub async fn register(
        &self,
        name: &str,
        handler: Arc<dyn ToolHandler>,
        mode_required: ToolMode,
        description: &str,
        override_existing: bool,
    ) -> bool {
        let mut tools = self.tools.write().await;
        if tools.contains_key(name) && !override_existing {
            debug!(%name, "ToolCatalog::register: already present, skipping");
            return false;
        }
        tools.insert(
            name.to_string(),
            ToolRegistration {
                handler,
                mode_required,
                description: description.to_string(),
            },
        );
        debug!(%name, %mode_required, "ToolCatalog::register: registered");
        true
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.tools.write().await.remove(name).is_some()
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Tool names visible in the given mode (all tools when `None`), sorted
    pub async fn list_tools(&self, mode: Option<Mode>) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut names: Vec<String> = tools
            .iter()
            .filter(|(_, reg)| mode.map(|m| reg.mode_required.allows(m)).unwrap_or(true))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Tool names with descriptions, for prompt assembly
    pub async fn list_tools_with_descriptions(&self, mode: Option<Mode>) -> Vec<(String, String)> {
        let tools = self.tools.read().await;
        let mut entries: Vec<(String, String)> = tools
            .iter()
            .filter(|(_, reg)| mode.map(|m| reg.mode_required.allows(m)).unwrap_or(true))
            .map(|(name, reg)| (name.clone(), reg.description.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Execute a tool and normalize the result
    ///
    /// The result is always a map with a `status` key:
    /// - unknown tool -> `{status: "error"}`
    /// - mode gate failure -> `{status: "denied"}`
    /// - handler error -> `{status: "error"}`
    /// - non-map result -> wrapped under `result` with `status: "success"`
    /// - map result without `status` -> `status: "success"` injected
    pub async fn execute(&self, name: &str, args: Value, mode: Option<Mode>) -> Value {
        debug!(%name, ?mode, "ToolCatalog::execute: called");

        let registration = {
            let tools = self.tools.read().await;
            tools.get(name).cloned()
        };

        let Some(registration) = registration else {
            return json!({"status": "error", "error": format!("Unknown tool: {}", name)});
        };

        if let Some(mode) = mode {
            if !registration.mode_required.allows(mode) {
                let reason = format!(
                    "Tool '{}' requires {} mode, call was made in {} mode",
                    name, registration.mode_required, mode
                );
                warn!("[ToolCatalog] {}", reason);
                return json!({"status": "denied", "error": reason});
            }
        }

        match registration.handler.call(args).await {
            Ok(Value::Object(mut map)) => {
                map.entry("status").or_insert_with(|| json!("success"));
                Value::Object(map)
            }
            Ok(other) => json!({"status": "success", "result": other}),
            Err(e) => {
                warn!(%name, error = %e, "ToolCatalog::execute: handler failed");
                json!({"status": "error", "error": e.to_string(), "critical": e.is_critical()})
            }
        }
    }
}

/// Resolve a legacy `internal://` tool URI to its canonical dotted name
///
/// Canonical names and unknown URIs pass through unchanged.
pub fn resolve_tool_uri(uri: &str) -> &str {
    match uri {
        "internal://internet_research.execute_research" => "internet.research",
        "internal://internet_research.execute_full_research" => "internet.research_full",
        "internal://memory.search" => "memory.search",
        "internal://memory.save" => "memory.save",
        "internal://memory.delete" => "memory.delete",
        "internal://llm.call" => "llm.call",
        "internal://workflow_registry.register" => "workflow.register",
        "internal://workflow_registry.validate_tools" => "workflow.validate_tools",
        "internal://tool_creator.create" => "tool.create",
        other => other,
    }
}
