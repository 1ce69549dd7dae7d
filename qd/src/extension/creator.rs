//! ToolCreator - the validate/backup/write/test/register pipeline

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use turnstore::TurnDirectory;

use crate::planning::{PlanStateManager, ToolCreationFailure};
use crate::tools::{load_tool_bundle, ToolCatalog, ToolServerClient};

use super::backup::BackupManager;
use super::sandbox::run_sandbox_tests;
use super::spec_validator::validate_tool_spec;

/// Inputs to one tool-creation run
#[derive(Debug, Clone)]
pub struct CreateToolRequest {
    /// Bundle (workflow) the tool belongs to
    pub workflow: String,

    /// Canonical dotted tool name
    pub tool_name: String,

    /// Spec markdown with YAML frontmatter
    pub spec_markdown: String,

    /// Implementation source exporting the entrypoint
    pub impl_source: String,

    /// Optional test source; absent tests are only allowed with skip_tests
    pub test_source: Option<String>,

    pub skip_tests: bool,
}

/// Outcome of one tool-creation run
#[derive(Debug, Clone)]
pub struct CreateToolResult {
    pub success: bool,
    pub paths: Vec<PathBuf>,
    pub registered: bool,
    pub test_summary: Option<String>,
    pub validation_errors: Vec<String>,
    pub reason: Option<String>,
}

impl CreateToolResult {
    fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            paths: Vec::new(),
            registered: false,
            test_summary: None,
            validation_errors: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

/// Runs the self-extension pipeline for one tool
pub struct ToolCreator {
    bundles_dir: PathBuf,
    catalog: Arc<ToolCatalog>,
    server: Arc<ToolServerClient>,
    plan_state: PlanStateManager,
    backup_keep_count: usize,
    test_timeout: Duration,
}

impl ToolCreator {
    pub fn new(bundles_dir: impl Into<PathBuf>, catalog: Arc<ToolCatalog>, server: Arc<ToolServerClient>) -> Self {
        Self {
            bundles_dir: bundles_dir.into(),
            catalog,
            server,
            plan_state: PlanStateManager,
            backup_keep_count: 5,
            test_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_backup_keep_count(mut self, keep_count: usize) -> Self {
        self.backup_keep_count = keep_count;
        self
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Create a tool: validate, back up, write, test, register
    ///
    /// On any failure the bundle's file set is restored exactly and the
    /// failure is appended to `tool_creation_failures` in plan state.
    pub async fn create(&self, request: CreateToolRequest, turn_dir: &TurnDirectory) -> CreateToolResult {
        info!("[ToolCreator] Creating {} in bundle {}", request.tool_name, request.workflow);

        // 1. Spec validation
        let validation = validate_tool_spec(&request.spec_markdown);
        if !validation.is_valid() {
            let errors: Vec<String> = validation
                .errors
                .iter()
                .map(|(field, message)| format!("{}: {}", field, message))
                .collect();
            self.record_failure(turn_dir, &request, &format!("spec invalid: {}", errors.join("; ")), &[]);
            return CreateToolResult {
                validation_errors: errors,
                ..CreateToolResult::failure("spec validation failed")
            };
        }

        let bundle_dir = self.bundles_dir.join(&request.workflow);
        let tools_dir = bundle_dir.join("tools");
        if let Err(e) = std::fs::create_dir_all(&tools_dir) {
            return CreateToolResult::failure(format!("cannot create bundle dir: {}", e));
        }

        let base = request.tool_name.replace('.', "_");
        let spec_path = tools_dir.join(format!("{}.md", base));
        let impl_path = tools_dir.join(format!("{}.py", base));
        let test_path = tools_dir.join(format!("test_{}.py", base));

        let mut targets: Vec<(PathBuf, &str)> = vec![
            (spec_path.clone(), request.spec_markdown.as_str()),
            (impl_path.clone(), request.impl_source.as_str()),
        ];
        if let Some(test_source) = &request.test_source {
            targets.push((test_path.clone(), test_source.as_str()));
        }

        // 2. Backup existing files, remember which paths are new
        let backup = BackupManager::new(&bundle_dir, self.backup_keep_count);
        let mut backups: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut created: Vec<PathBuf> = Vec::new();
        for (path, _) in &targets {
            match backup.backup_file(path) {
                Ok(Some(backup_path)) => backups.push((backup_path, path.clone())),
                Ok(None) => created.push(path.clone()),
                Err(e) => {
                    return CreateToolResult::failure(format!("backup failed: {}", e));
                }
            }
        }

        // 3. Write all files
        for (path, content) in &targets {
            if let Err(e) = std::fs::write(path, content) {
                self.rollback(&backup, &backups, &created);
                self.record_failure(turn_dir, &request, &format!("write failed: {}", e), &targets);
                return CreateToolResult::failure(format!("write failed: {}", e));
            }
        }

        // 4. Sandbox tests
        let mut test_summary = None;
        if !request.skip_tests {
            let Some(_) = request.test_source else {
                self.rollback(&backup, &backups, &created);
                self.record_failure(turn_dir, &request, "no tests provided", &targets);
                return CreateToolResult::failure("tests required unless skip_tests is set");
            };
            let result = run_sandbox_tests(&test_path, &bundle_dir, self.test_timeout).await;
            test_summary = Some(result.summary());
            if !result.passed() {
                warn!("[ToolCreator] Tests failed for {}: {}", request.tool_name, result.summary());
                self.rollback(&backup, &backups, &created);
                self.record_failure(
                    turn_dir,
                    &request,
                    &format!("tests failed: {}", result.summary()),
                    &targets,
                );
                return CreateToolResult {
                    test_summary,
                    ..CreateToolResult::failure("sandbox tests failed")
                };
            }
        }

        // 5. Register through the bundle loader
        let registered = match load_tool_bundle(&self.catalog, self.server.clone(), &tools_dir).await {
            Ok(names) => names.iter().any(|n| n == &request.tool_name) || self.catalog.has_tool(&request.tool_name).await,
            Err(e) => {
                self.rollback(&backup, &backups, &created);
                self.record_failure(turn_dir, &request, &format!("registration failed: {}", e), &targets);
                return CreateToolResult::failure(format!("registration failed: {}", e));
            }
        };

        for (path, _) in &targets {
            if let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) {
                let _ = backup.apply_retention(&name);
            }
        }

        info!("[ToolCreator] Created {} ({} files)", request.tool_name, targets.len());
        CreateToolResult {
            success: true,
            paths: targets.into_iter().map(|(p, _)| p).collect(),
            registered,
            test_summary,
            validation_errors: Vec::new(),
            reason: None,
        }
    }

    /// Restore backed-up files and delete newly created ones
    fn rollback(&self, backup: &BackupManager, backups: &[(PathBuf, PathBuf)], created: &[PathBuf]) {
        for (backup_path, original) in backups {
            if let Err(e) = backup.restore(backup_path, original) {
                warn!("[ToolCreator] Rollback restore failed for {}: {}", original.display(), e);
            }
        }
        for path in created {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("[ToolCreator] Rollback delete failed for {}: {}", path.display(), e);
                }
            }
        }
        info!("[ToolCreator] Rolled back {} restores, {} deletions", backups.len(), created.len());
    }

    fn record_failure(&self, turn_dir: &TurnDirectory, request: &CreateToolRequest, reason: &str, targets: &[(PathBuf, &str)]) {
        let failure = ToolCreationFailure {
            tool: request.tool_name.clone(),
            reason: reason.to_string(),
            paths: targets.iter().map(|(p, _)| p.display().to_string()).collect(),
        };
        if let Err(e) = self.plan_state.record_tool_creation_failure(turn_dir, failure) {
            warn!("[ToolCreator] Failed to record creation failure: {}", e);
        }
    }
}

/// Snapshot the file names under a directory tree (for rollback checks)
#[cfg(test)]
pub(crate) fn file_set(dir: &Path) -> std::collections::BTreeSet<PathBuf> {
    let mut set = std::collections::BTreeSet::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                set.extend(file_set(&path));
            } else {
                set.insert(path);
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolServerConfig;
    use crate::extension::spec_validator::testing::VALID_SPEC;
    use crate::extension::BACKUP_DIR;
    use std::collections::BTreeSet;
    use turnstore::create_turn_directory;

    fn creator(bundles_dir: &Path) -> ToolCreator {
        let catalog = Arc::new(ToolCatalog::new());
        let server = Arc::new(ToolServerClient::from_config(&ToolServerConfig::default()).unwrap());
        ToolCreator::new(bundles_dir, catalog, server).with_test_timeout(Duration::from_secs(20))
    }

    fn request(test_source: Option<&str>, skip_tests: bool) -> CreateToolRequest {
        CreateToolRequest {
            workflow: "spreadsheets".to_string(),
            tool_name: "spreadsheet.read".to_string(),
            spec_markdown: VALID_SPEC.to_string(),
            impl_source: "def read_spreadsheet(**kwargs):\n    return {\"rows\": []}\n".to_string(),
            test_source: test_source.map(String::from),
            skip_tests,
        }
    }

    fn setup() -> (tempfile::TempDir, TurnDirectory) {
        let temp = tempfile::tempdir().unwrap();
        let turn = create_turn_directory(temp.path().join("turns"), "t", "s", "chat").unwrap();
        (temp, turn)
    }

    #[tokio::test]
    async fn test_successful_creation_registers_tool() {
        let (temp, turn) = setup();
        let bundles = temp.path().join("bundles");
        let creator = creator(&bundles);

        let result = creator
            .create(request(Some("def test_read():\n    assert True\n"), false), &turn)
            .await;

        assert!(result.success, "reason: {:?}", result.reason);
        assert!(result.registered);
        assert_eq!(result.paths.len(), 3);
        assert!(creator.catalog.has_tool("spreadsheet.read").await);
    }

    #[tokio::test]
    async fn test_invalid_spec_fails_without_writes() {
        let (temp, turn) = setup();
        let bundles = temp.path().join("bundles");
        let creator = creator(&bundles);

        let mut bad = request(None, true);
        bad.spec_markdown = "---\nname: spreadsheet.read\n---\n".to_string();

        let result = creator.create(bad, &turn).await;
        assert!(!result.success);
        assert!(!result.validation_errors.is_empty());
        assert!(!bundles.join("spreadsheets/tools").exists());

        let state = PlanStateManager.load(&turn).unwrap();
        assert_eq!(state.tool_creation_failures.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_tests_roll_back_file_set() {
        let (temp, turn) = setup();
        let bundles = temp.path().join("bundles");
        let bundle_dir = bundles.join("spreadsheets");
        std::fs::create_dir_all(bundle_dir.join("tools")).unwrap();
        let before = file_set(&bundle_dir);

        let creator = creator(&bundles);
        let result = creator
            .create(request(Some("raise SystemExit(1)\n"), false), &turn)
            .await;

        assert!(!result.success);
        // Bundle file set equals the set prior to invocation (backups aside)
        let after: BTreeSet<_> = file_set(&bundle_dir)
            .into_iter()
            .filter(|p| !p.components().any(|c| c.as_os_str() == BACKUP_DIR))
            .collect();
        assert_eq!(before, after);

        let state = PlanStateManager.load(&turn).unwrap();
        assert_eq!(state.tool_creation_failures.len(), 1);
        assert!(state.tool_creation_failures[0].reason.contains("tests failed"));
    }

    #[tokio::test]
    async fn test_skip_tests_allows_missing_test_source() {
        let (temp, turn) = setup();
        let creator = creator(&temp.path().join("bundles"));

        let result = creator.create(request(None, true), &turn).await;
        assert!(result.success);
        assert_eq!(result.paths.len(), 2);
        assert!(result.test_summary.is_none());
    }

    #[tokio::test]
    async fn test_missing_tests_without_skip_fails() {
        let (temp, turn) = setup();
        let creator = creator(&temp.path().join("bundles"));

        let result = creator.create(request(None, false), &turn).await;
        assert!(!result.success);
    }
}
