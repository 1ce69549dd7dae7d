//! WorkflowRegistry - loads and indexes workflow definitions

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::tools::{load_tool_bundle, ToolCatalog, ToolServerClient};

use super::definition::Workflow;
use super::error::WorkflowError;

/// Process-wide registry of workflows
///
/// Indexed three ways: exact name, intent triggers, free-text triggers.
/// Dynamic registrations publish atomically like the tool catalog.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every workflow under a directory tree
    ///
    /// Skips `README.md` and anything inside a `templates/` directory
    /// (templates carry `{{placeholders}}` that break YAML). Workflows in
    /// a `_bootstrap/` directory are marked as bootstrap.
    pub async fn load_all(&self, workflows_dir: &Path) -> usize {
        if !workflows_dir.exists() {
            warn!("[WorkflowRegistry] Workflows dir not found: {}", workflows_dir.display());
            return 0;
        }

        let mut loaded = 0;
        for entry in WalkDir::new(workflows_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().map(|e| e != "md").unwrap_or(true) {
                continue;
            }
            if path.file_name().map(|n| n == "README.md").unwrap_or(false) {
                continue;
            }
            if path.components().any(|c| c.as_os_str() == "templates") {
                continue;
            }

            match Workflow::load(path) {
                Ok(mut workflow) => {
                    if path
                        .parent()
                        .and_then(|p| p.file_name())
                        .map(|n| n == "_bootstrap")
                        .unwrap_or(false)
                    {
                        workflow.is_bootstrap = true;
                    }
                    self.register(workflow).await;
                    loaded += 1;
                }
                Err(e) => {
                    warn!("[WorkflowRegistry] Failed to load {}: {}", path.display(), e);
                }
            }
        }

        info!("[WorkflowRegistry] Loaded {} workflows from {}", loaded, workflows_dir.display());
        loaded
    }

    /// Load bundles: each `<bundles_dir>/<name>/workflow.md` plus its
    /// optional sibling `tools/` directory
    pub async fn load_bundles(
        &self,
        bundles_dir: &Path,
        catalog: &ToolCatalog,
        server: Arc<ToolServerClient>,
    ) -> usize {
        if !bundles_dir.exists() {
            debug!("[WorkflowRegistry] Bundles dir not found: {}", bundles_dir.display());
            return 0;
        }

        let mut loaded = 0;
        let mut bundle_dirs: Vec<_> = match std::fs::read_dir(bundles_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(e) => {
                warn!("[WorkflowRegistry] Cannot read bundles dir: {}", e);
                return 0;
            }
        };
        bundle_dirs.sort();

        for bundle_dir in bundle_dirs {
            let workflow_path = bundle_dir.join("workflow.md");
            if !workflow_path.exists() {
                continue;
            }
            match Workflow::load(&workflow_path) {
                Ok(workflow) => {
                    let tools_dir = workflow
                        .tool_bundle
                        .as_ref()
                        .map(|p| bundle_dir.join(p))
                        .unwrap_or_else(|| bundle_dir.join("tools"));
                    if let Err(e) = load_tool_bundle(catalog, server.clone(), &tools_dir).await {
                        warn!("[WorkflowRegistry] Bundle tools failed for {}: {}", workflow.name, e);
                    }
                    self.register(workflow).await;
                    loaded += 1;
                }
                Err(e) => {
                    warn!("[WorkflowRegistry] Failed to load bundle {}: {}", bundle_dir.display(), e);
                }
            }
        }
        loaded
    }

    /// Register (or replace) a workflow
    pub async fn register(&self, workflow: Workflow) {
        debug!(name = %workflow.name, "WorkflowRegistry::register: called");
        self.workflows
            .write()
            .await
            .insert(workflow.name.clone(), Arc::new(workflow));
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.workflows.write().await.remove(name).is_some()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Workflow>> {
        self.workflows.read().await.get(name).cloned()
    }

    /// Resolve a workflow by name, then intent, then free-text trigger
    pub async fn resolve(&self, hint: &str) -> Option<Arc<Workflow>> {
        let workflows = self.workflows.read().await;
        if let Some(workflow) = workflows.get(hint) {
            return Some(workflow.clone());
        }

        let intent = hint.strip_prefix("intent:").unwrap_or(hint);
        let mut by_intent: Vec<&Arc<Workflow>> = workflows
            .values()
            .filter(|w| w.intents.iter().any(|i| i == intent))
            .collect();
        by_intent.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(workflow) = by_intent.first() {
            return Some((*workflow).clone());
        }

        let lower = hint.to_lowercase();
        let mut by_trigger: Vec<&Arc<Workflow>> = workflows
            .values()
            .filter(|w| w.triggers.iter().any(|t| lower.contains(&t.to_lowercase())))
            .collect();
        by_trigger.sort_by(|a, b| a.name.cmp(&b.name));
        by_trigger.first().map(|w| (*w).clone())
    }

    /// All workflow names, sorted
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
