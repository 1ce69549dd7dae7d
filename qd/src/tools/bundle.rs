//! Tool bundle loader
//!
//! A bundle ships tool specs as markdown files with YAML frontmatter in a
//! `tools/` directory, each paired with a sibling source file exporting
//! the named entrypoint. The tool server executes the source; the loader
//! registers a remote handler bound to the spec.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::catalog::{ToolCatalog, ToolMode};
use super::error::ToolError;
use super::server::{RemoteTool, ToolServerClient};

/// YAML frontmatter of a tool spec
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpecFrontmatter {
    pub name: String,
    pub entrypoint: String,

    #[serde(default)]
    pub mode_required: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

/// Split a markdown document into YAML frontmatter and body
///
/// Returns `None` when the document has no `---` fence pair.
pub fn parse_frontmatter(content: &str) -> Option<(serde_yaml::Value, &str)> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let yaml = serde_yaml::from_str(&rest[..end]).ok()?;
    let body = rest[end + 4..].trim_start_matches('\n');
    Some((yaml, body))
}

/// Find the sibling source file for a spec (`x.md` -> `x.<anything>`)
fn find_sibling_source(spec_path: &Path) -> Option<std::path::PathBuf> {
    let stem = spec_path.file_stem()?;
    let dir = spec_path.parent()?;
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.file_stem() == Some(stem) && p.extension().map(|e| e != "md").unwrap_or(false))
}

/// Scan a bundle's `tools/` directory and register every valid spec
///
/// Specs without a sibling source file are skipped with a warning.
/// Existing catalog names are kept unless the spec sets `override: true`.
/// Returns the names registered.
pub async fn load_tool_bundle(
    catalog: &ToolCatalog,
    server: Arc<ToolServerClient>,
    tools_dir: &Path,
) -> Result<Vec<String>, ToolError> {
    if !tools_dir.exists() {
        debug!(dir = %tools_dir.display(), "load_tool_bundle: no tools directory");
        return Ok(Vec::new());
    }

    let mut registered = Vec::new();
    let mut spec_paths: Vec<_> = std::fs::read_dir(tools_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "md").unwrap_or(false))
        .collect();
    spec_paths.sort();

    for spec_path in spec_paths {
        let content = std::fs::read_to_string(&spec_path)?;
        let Some((yaml, _body)) = parse_frontmatter(&content) else {
            warn!(path = %spec_path.display(), "load_tool_bundle: missing frontmatter, skipping");
            continue;
        };
        let spec: ToolSpecFrontmatter = match serde_yaml::from_value(yaml) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(path = %spec_path.display(), error = %e, "load_tool_bundle: bad frontmatter, skipping");
                continue;
            }
        };

        if find_sibling_source(&spec_path).is_none() {
            warn!(tool = %spec.name, "load_tool_bundle: no sibling source file, skipping");
            continue;
        }

        let handler = Arc::new(RemoteTool {
            name: spec.name.clone(),
            server: server.clone(),
        });
        let mode = ToolMode::parse(spec.mode_required.as_deref());
        if catalog
            .register(&spec.name, handler, mode, &spec.description, spec.override_existing)
            .await
        {
            info!("[Bundle] Registered tool {} from {}", spec.name, spec_path.display());
            registered.push(spec.name);
        }
    }

    Ok(registered)
}
