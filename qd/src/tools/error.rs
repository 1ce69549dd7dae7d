//! Tool error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Tool '{name}' requires {required} mode, call was made in {actual} mode")]
    ModeDenied {
        name: String,
        required: String,
        actual: String,
    },

    #[error("Tool '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Tool server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Category B errors require user intervention before proceeding
    ///
    /// Covers authentication, permission, service availability, rate
    /// limiting, unknown tools, and schema validation failures.
    pub fn is_critical(&self) -> bool {
        match self {
            Self::UnknownTool { .. } => true,
            Self::InvalidArguments(_) => true,
            Self::ServerError { status, .. } => matches!(status, 401 | 403 | 429 | 503),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_classification() {
        assert!(ToolError::UnknownTool { name: "x".into() }.is_critical());
        assert!(ToolError::ServerError {
            status: 401,
            message: "auth".into()
        }
        .is_critical());
        assert!(ToolError::ServerError {
            status: 503,
            message: "down".into()
        }
        .is_critical());
        assert!(!ToolError::ServerError {
            status: 500,
            message: "oops".into()
        }
        .is_critical());
        assert!(!ToolError::Timeout {
            name: "x".into(),
            timeout: Duration::from_secs(1)
        }
        .is_critical());
    }
}
