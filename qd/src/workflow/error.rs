//! Workflow error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors from workflow loading and execution
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow file {path}: {reason}")]
    InvalidDefinition { path: PathBuf, reason: String },

    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Required input missing: {0}")]
    MissingInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
