//! Pack error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors from recipe loading and pack building
#[derive(Debug, Error)]
pub enum PackError {
    #[error("Budget exceeded: {used} tokens > {budget} budget ({context})")]
    BudgetExceeded {
        used: usize,
        budget: usize,
        context: String,
    },

    #[error("Required doc not found: {name} (resolved to {path})")]
    MissingDoc { name: String, path: PathBuf },

    #[error("Recipe configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
