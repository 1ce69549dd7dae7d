//! Workflow definition - YAML-fronted markdown parsing

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value as Yaml;

use crate::tools::parse_frontmatter;

use super::error::WorkflowError;

/// Typed input declaration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputSpec {
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<serde_json::Value>,

    /// `original_query` | `section_N` | `content_reference.<field>`
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub description: String,
}

/// Typed output declaration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputSpec {
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,

    #[serde(default)]
    pub description: String,
}

/// One workflow step
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub name: String,

    /// Tool URI or canonical name
    pub tool: String,

    #[serde(default)]
    pub args: serde_json::Value,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub condition: Option<String>,
}

/// Fallback behavior when a workflow fails
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fallback {
    #[serde(default)]
    pub workflow: Option<String>,

    #[serde(default = "default_fallback_message")]
    pub message: String,
}

fn default_fallback_message() -> String {
    "Workflow failed.".to_string()
}

/// A complete workflow definition
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    pub name: String,
    pub version: String,
    pub category: String,
    pub description: String,

    /// Free-text triggers
    pub triggers: Vec<String>,

    /// Intent triggers (from `{intent: x}` maps or `intent:x` strings)
    pub intents: Vec<String>,

    pub tools: Vec<String>,
    pub tool_bundle: Option<String>,
    pub inputs: BTreeMap<String, InputSpec>,
    pub outputs: BTreeMap<String, OutputSpec>,
    pub steps: Vec<Step>,
    pub success_criteria: Vec<String>,
    pub fallback: Option<Fallback>,
    pub is_bootstrap: bool,
    pub source_path: Option<PathBuf>,
}

/// Raw frontmatter shape before trigger normalization
#[derive(Debug, Deserialize)]
struct RawWorkflow {
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    triggers: Vec<Yaml>,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    tool_bundle: Option<String>,
    #[serde(default)]
    inputs: BTreeMap<String, InputSpec>,
    #[serde(default)]
    outputs: BTreeMap<String, OutputSpec>,
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    success_criteria: Vec<String>,
    #[serde(default)]
    fallback: Option<Fallback>,
    #[serde(default)]
    bootstrap: bool,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

impl Workflow {
    /// Parse a workflow from YAML-fronted markdown
    pub fn parse(content: &str, path: &Path) -> Result<Self, WorkflowError> {
        let (yaml, _body) = parse_frontmatter(content).ok_or_else(|| WorkflowError::InvalidDefinition {
            path: path.to_path_buf(),
            reason: "missing YAML frontmatter".to_string(),
        })?;

        let raw: RawWorkflow = serde_yaml::from_value(yaml).map_err(|e| WorkflowError::InvalidDefinition {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self::from_raw(raw, Some(path.to_path_buf())))
    }

    /// Build a workflow from a JSON object (dynamic CREATE_WORKFLOW payloads)
    pub fn from_json(value: &serde_json::Value) -> Result<Self, WorkflowError> {
        let raw: RawWorkflow =
            serde_json::from_value(value.clone()).map_err(|e| WorkflowError::InvalidDefinition {
                path: PathBuf::from("<dynamic>"),
                reason: e.to_string(),
            })?;
        Ok(Self::from_raw(raw, None))
    }

    fn from_raw(raw: RawWorkflow, source_path: Option<PathBuf>) -> Self {
        let mut triggers = Vec::new();
        let mut intents = Vec::new();
        for trigger in raw.triggers {
            match trigger {
                Yaml::String(s) => {
                    if let Some(intent) = s.strip_prefix("intent:") {
                        intents.push(intent.trim().to_string());
                    } else {
                        triggers.push(s);
                    }
                }
                Yaml::Mapping(map) => {
                    if let Some(Yaml::String(intent)) = map.get("intent") {
                        intents.push(intent.clone());
                    }
                }
                _ => {}
            }
        }

        Self {
            name: raw.name,
            version: raw.version,
            category: raw.category,
            description: raw.description,
            triggers,
            intents,
            tools: raw.tools,
            tool_bundle: raw.tool_bundle,
            inputs: raw.inputs,
            outputs: raw.outputs,
            steps: raw.steps,
            success_criteria: raw.success_criteria,
            fallback: raw.fallback,
            is_bootstrap: raw.bootstrap,
            source_path,
        }
    }

    /// Load a workflow from disk
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    /// A commerce-flavored research workflow used across tests
    pub const COMMERCE_WORKFLOW: &str = r#"---
name: commerce_search
version: "1.2"
category: commerce
description: Find products with prices and availability
triggers:
  - "find products"
  - "intent:commerce"
  - intent: purchase
tools:
  - internet.research
inputs:
  query:
    type: string
    required: true
    from: original_query
  max_results:
    type: int
    default: 5
outputs:
  findings:
    type: list
steps:
  - name: research
    tool: internal://internet_research.execute_research
    args:
      query: "{{query}}"
      limit: "{{max_results}}"
    outputs: [findings]
success_criteria:
  - "count(findings) >= 1"
fallback:
  workflow: generic_search
  message: "Could not find matching products."
---

# commerce_search

Searches shopping sources for products matching the query.
"#;
}
