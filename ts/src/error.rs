//! TurnStore error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while managing turn directories
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown path type: {0}")]
    UnknownPathType(String),

    #[error("Turn directory does not exist: {path}")]
    MissingTurnDir { path: PathBuf },

    #[error("Manifest not found in {path}")]
    MissingManifest { path: PathBuf },

    #[error("Attempt directory already exists: {path}")]
    AttemptExists { path: PathBuf },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_path_type_message() {
        let err = StoreError::UnknownPathType("bogus".to_string());
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_missing_manifest_message() {
        let err = StoreError::MissingManifest {
            path: PathBuf::from("/tmp/turn_000001"),
        };
        assert!(err.to_string().contains("turn_000001"));
    }
}
