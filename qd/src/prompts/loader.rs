//! Prompt Loader
//!
//! Loads prompt fragments from files or falls back to embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{eyre, Result};
use handlebars::Handlebars;
use tracing::debug;

use super::embedded;

/// Loads and renders prompt fragments
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// User override directory (e.g. `.querydaemon/prompts/`)
    user_dir: Option<PathBuf>,
    /// Repo default directory (e.g. `prompts/`)
    repo_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a new prompt loader rooted at the working directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let user_dir = root.join(".querydaemon/prompts");
        let repo_dir = root.join("prompts");

        Self {
            hbs: Handlebars::new(),
            user_dir: user_dir.exists().then_some(user_dir),
            repo_dir: repo_dir.exists().then_some(repo_dir),
        }
    }

    /// Create a loader that only uses embedded prompts (for testing)
    pub fn embedded_only() -> Self {
        Self {
            hbs: Handlebars::new(),
            user_dir: None,
            repo_dir: None,
        }
    }

    /// Load a fragment by name
    ///
    /// Checks in order:
    /// 1. User override: `.querydaemon/prompts/{name}.pmt`
    /// 2. Repo default: `prompts/{name}.pmt`
    /// 3. Embedded fallback
    pub fn load(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load: called");
        for dir in [self.user_dir.as_ref(), self.repo_dir.as_ref()].into_iter().flatten() {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load: found on disk");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
        }

        if let Some(content) = embedded::get_embedded(name) {
            return Ok(content.to_string());
        }

        Err(eyre!("Prompt fragment not found: {}", name))
    }

    /// Load and render a fragment with a template context
    pub fn render(&self, name: &str, context: &serde_json::Value) -> Result<String> {
        let template = self.load(name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render prompt {}: {}", name, e))
    }
}
