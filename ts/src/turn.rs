//! Turn directory allocation and path resolution

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use log::{debug, info};

use crate::error::StoreError;
use crate::manifest::Manifest;
use crate::TURN_LOCK_FILE;

/// How a document name resolves to a filesystem path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathType {
    /// Local to the turn directory (the common case)
    #[default]
    Turn,
    /// Relative to the repo root, passed through unchanged
    Repo,
    /// Absolute filesystem path, passed through unchanged
    Absolute,
    /// Session-scoped path with a `{session_id}` placeholder
    Session,
}

impl std::str::FromStr for PathType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turn" => Ok(Self::Turn),
            "repo" => Ok(Self::Repo),
            "absolute" => Ok(Self::Absolute),
            "session" => Ok(Self::Session),
            other => Err(StoreError::UnknownPathType(other.to_string())),
        }
    }
}

impl std::fmt::Display for PathType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Turn => write!(f, "turn"),
            Self::Repo => write!(f, "repo"),
            Self::Absolute => write!(f, "absolute"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// Handle to a single turn's directory
#[derive(Debug, Clone)]
pub struct TurnDirectory {
    /// Turn identifier (`turn_000042`)
    pub turn_id: String,

    /// Owning session
    pub session_id: String,

    /// Operating mode (`chat` or `code`)
    pub mode: String,

    /// Trace ID linking this turn to the request
    pub trace_id: String,

    /// Absolute path of the turn directory
    pub path: PathBuf,
}

impl TurnDirectory {
    /// Create a handle without touching the filesystem
    pub fn new(
        base_dir: impl AsRef<Path>,
        turn_id: impl Into<String>,
        session_id: impl Into<String>,
        mode: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        let turn_id = turn_id.into();
        let path = base_dir.as_ref().join(&turn_id);
        Self {
            turn_id,
            session_id: session_id.into(),
            mode: mode.into(),
            trace_id: trace_id.into(),
            path,
        }
    }

    /// Create the directory on disk
    pub fn create(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.path)?;
        info!("[TurnDir] Created directory: {}", self.path.display());
        Ok(())
    }

    /// Resolve a document path against the chosen scope
    pub fn doc_path(&self, doc_name: &str, path_type: PathType) -> PathBuf {
        match path_type {
            PathType::Turn => self.path.join(doc_name),
            PathType::Repo | PathType::Absolute => PathBuf::from(doc_name),
            PathType::Session => PathBuf::from(doc_name.replace("{session_id}", &self.session_id)),
        }
    }

    /// Check whether the directory exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// List document names at the turn root (files only)
    pub fn list_docs(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.path) else {
            return Vec::new();
        };
        let mut docs: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        docs.sort();
        docs
    }

    /// Write the user query document
    ///
    /// Produces `user_query.md` with a metadata header, the query body, and
    /// optional extra metadata bullets.
    pub fn write_user_query(&self, query: &str, metadata: &[(String, String)]) -> Result<PathBuf, StoreError> {
        let doc_path = self.doc_path("user_query.md", PathType::Turn);

        let mut content = format!(
            "# User Query\n\n**Turn ID:** {}\n**Session ID:** {}\n**Timestamp:** {}\n\n## Query\n{}\n",
            self.turn_id,
            self.session_id,
            Utc::now().to_rfc3339(),
            query
        );

        if !metadata.is_empty() {
            content.push_str("\n## Metadata\n");
            for (key, value) in metadata {
                content.push_str(&format!("- **{}:** {}\n", key, value));
            }
        }

        fs::write(&doc_path, content)?;
        info!("[TurnDir] Wrote user_query.md ({} chars)", query.len());
        Ok(doc_path)
    }

    /// Archive the current attempt's files into `attempt_N/`
    ///
    /// Copies every regular file at the turn root verbatim. Existing
    /// `attempt_*` directories and the scratch `.backup/` dir are left
    /// untouched. Must run before any file is rewritten for a retry.
    pub fn archive_attempt(&self, attempt: u32) -> Result<Vec<String>, StoreError> {
        let attempt_dir = self.path.join(format!("attempt_{}", attempt));
        if attempt_dir.exists() {
            return Err(StoreError::AttemptExists { path: attempt_dir });
        }
        fs::create_dir_all(&attempt_dir)?;

        let mut archived = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            fs::copy(&path, attempt_dir.join(&name))?;
            archived.push(name);
        }
        archived.sort();

        info!(
            "[TurnDir] Archived {} files into attempt_{}",
            archived.len(),
            attempt
        );
        Ok(archived)
    }

    /// Load this turn's manifest from disk
    pub fn load_manifest(&self) -> Result<Manifest, StoreError> {
        Manifest::load(self)
    }
}

/// Allocate and create a new turn directory with the next monotonic ID
///
/// Allocation holds an exclusive lock on `<base_dir>/.turn_lock` so two
/// concurrent requests cannot mint the same turn number.
pub fn create_turn_directory(
    base_dir: impl AsRef<Path>,
    trace_id: &str,
    session_id: &str,
    mode: &str,
) -> Result<TurnDirectory, StoreError> {
    let base_dir = base_dir.as_ref();
    fs::create_dir_all(base_dir)?;

    let lock_path = base_dir.join(TURN_LOCK_FILE);
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file.lock_exclusive().map_err(|e| StoreError::Lock {
        path: lock_path.clone(),
        source: e,
    })?;

    let turn_id = next_turn_id(base_dir)?;
    let turn_dir = TurnDirectory::new(base_dir, turn_id, session_id, mode, trace_id);
    turn_dir.create()?;

    let _ = FileExt::unlock(&lock_file);
    debug!("[TurnDir] Allocated {}", turn_dir.turn_id);
    Ok(turn_dir)
}

/// Compute the next turn ID for a base directory
///
/// Scans existing `turn_*` directories, takes max+1, and zero-pads to six
/// digits. Directory names that do not parse are skipped.
pub fn next_turn_id(base_dir: impl AsRef<Path>) -> Result<String, StoreError> {
    let base_dir = base_dir.as_ref();
    if !base_dir.exists() {
        return Ok("turn_000001".to_string());
    }

    let mut max_num: u64 = 0;
    for entry in fs::read_dir(base_dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(suffix) = name.strip_prefix("turn_") else {
            continue;
        };
        if let Ok(num) = suffix.parse::<u64>() {
            max_num = max_num.max(num);
        }
    }

    Ok(format!("turn_{:06}", max_num + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_turn_id() {
        let temp = tempdir().unwrap();
        let id = next_turn_id(temp.path()).unwrap();
        assert_eq!(id, "turn_000001");
    }

    #[test]
    fn test_turn_id_increments_past_max() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("turn_000003")).unwrap();
        fs::create_dir(temp.path().join("turn_000001")).unwrap();
        fs::create_dir(temp.path().join("turn_junk")).unwrap();

        let id = next_turn_id(temp.path()).unwrap();
        assert_eq!(id, "turn_000004");
    }

    #[test]
    fn test_create_turn_directory() {
        let temp = tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "trace-1", "sess-1", "chat").unwrap();

        assert_eq!(turn.turn_id, "turn_000001");
        assert!(turn.exists());

        let turn2 = create_turn_directory(temp.path(), "trace-2", "sess-1", "chat").unwrap();
        assert_eq!(turn2.turn_id, "turn_000002");
    }

    #[test]
    fn test_doc_path_resolution() {
        let turn = TurnDirectory::new("/base", "turn_000001", "sess-9", "chat", "t");

        assert_eq!(
            turn.doc_path("context.md", PathType::Turn),
            PathBuf::from("/base/turn_000001/context.md")
        );
        assert_eq!(
            turn.doc_path("docs/notes.md", PathType::Repo),
            PathBuf::from("docs/notes.md")
        );
        assert_eq!(
            turn.doc_path("/tmp/x.md", PathType::Absolute),
            PathBuf::from("/tmp/x.md")
        );
        assert_eq!(
            turn.doc_path("sessions/{session_id}/prefs.json", PathType::Session),
            PathBuf::from("sessions/sess-9/prefs.json")
        );
    }

    #[test]
    fn test_path_type_parse() {
        assert_eq!("turn".parse::<PathType>().unwrap(), PathType::Turn);
        assert_eq!("session".parse::<PathType>().unwrap(), PathType::Session);
        assert!("bogus".parse::<PathType>().is_err());
    }

    #[test]
    fn test_write_user_query() {
        let temp = tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "trace-1", "sess-1", "chat").unwrap();

        let path = turn
            .write_user_query("find me a laptop", &[("intent".to_string(), "commerce".to_string())])
            .unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("# User Query"));
        assert!(content.contains("find me a laptop"));
        assert!(content.contains("**intent:** commerce"));
    }

    #[test]
    fn test_archive_attempt_is_byte_for_byte() {
        let temp = tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "trace-1", "sess-1", "chat").unwrap();

        fs::write(turn.path.join("context.md"), "section text").unwrap();
        fs::write(turn.path.join("plan_state.json"), "{\"goals\":[]}").unwrap();

        let archived = turn.archive_attempt(1).unwrap();
        assert!(archived.contains(&"context.md".to_string()));
        assert!(archived.contains(&"plan_state.json".to_string()));

        let original = fs::read(turn.path.join("context.md")).unwrap();
        let copy = fs::read(turn.path.join("attempt_1/context.md")).unwrap();
        assert_eq!(original, copy);
    }

    #[test]
    fn test_archive_attempt_rejects_duplicate() {
        let temp = tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "trace-1", "sess-1", "chat").unwrap();

        turn.archive_attempt(1).unwrap();
        let result = turn.archive_attempt(1);
        assert!(matches!(result, Err(StoreError::AttemptExists { .. })));
    }

    #[test]
    fn test_list_docs_skips_directories() {
        let temp = tempdir().unwrap();
        let turn = create_turn_directory(temp.path(), "trace-1", "sess-1", "chat").unwrap();

        fs::write(turn.path.join("context.md"), "x").unwrap();
        fs::create_dir(turn.path.join("attempt_1")).unwrap();

        let docs = turn.list_docs();
        assert_eq!(docs, vec!["context.md".to_string()]);
    }
}
