//! QueryDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main QueryDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM endpoint configuration
    pub llm: LlmConfig,

    /// Tool server endpoint configuration
    pub tool_server: ToolServerConfig,

    /// Loop and retry bounds
    pub limits: LimitsConfig,

    /// Storage locations
    pub storage: StorageConfig,

    /// Validation thresholds and sandbox settings
    pub validation: ValidationConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .querydaemon.yml
        let local_config = PathBuf::from(".querydaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/querydaemon/querydaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("querydaemon").join("querydaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Completion endpoint URL
    pub url: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Environment variable containing the bearer token
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Timeout for research-adjacent roles in milliseconds
    #[serde(rename = "research-timeout-ms")]
    pub research_timeout_ms: u64,

    /// Retry attempts for retryable errors
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/v1/chat/completions".to_string(),
            model: "default".to_string(),
            api_key_env: "QD_LLM_API_KEY".to_string(),
            max_tokens: 16384,
            timeout_ms: 1_800_000,
            research_timeout_ms: 3_600_000,
            max_attempts: 3,
        }
    }
}

/// Tool server endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    /// Base URL; tool names become path segments (`/internet.research`)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Timeout for ordinary tools in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Timeout for research tools in milliseconds
    #[serde(rename = "research-timeout-ms")]
    pub research_timeout_ms: u64,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            timeout_ms: 1_800_000,
            research_timeout_ms: 3_600_000,
        }
    }
}

/// Loop and retry bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Coordinator loop steps per invocation
    #[serde(rename = "max-coordinator-steps")]
    pub max_coordinator_steps: u32,

    /// Executor loop iterations per invocation
    #[serde(rename = "max-executor-iterations")]
    pub max_executor_iterations: u32,

    /// Legacy planning loop iterations
    #[serde(rename = "max-planning-iterations")]
    pub max_planning_iterations: u32,

    /// Tool calls per turn
    #[serde(rename = "max-tool-calls")]
    pub max_tool_calls: u32,

    /// `internet.research` calls per turn
    #[serde(rename = "max-research-calls")]
    pub max_research_calls: u32,

    /// Synthesis+validation retry attempts per turn
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Validator-driven revisions per turn
    #[serde(rename = "max-validation-revisions")]
    pub max_validation_revisions: u32,

    /// Consecutive COMMANDs before a forced ANALYZE
    #[serde(rename = "consecutive-command-cap")]
    pub consecutive_command_cap: u32,

    /// Seconds to wait for a user approval or intervention
    #[serde(rename = "approval-timeout-secs")]
    pub approval_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_coordinator_steps: 10,
            max_executor_iterations: 10,
            max_planning_iterations: 5,
            max_tool_calls: 20,
            max_research_calls: 2,
            max_retries: 3,
            max_validation_revisions: 2,
            consecutive_command_cap: 5,
            approval_timeout_secs: 180,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for turn directories
    #[serde(rename = "turns-dir")]
    pub turns_dir: PathBuf,

    /// Built-in workflows directory
    #[serde(rename = "workflows-dir")]
    pub workflows_dir: PathBuf,

    /// Workflow bundles root (each bundle: `<name>/workflow.md` + `tools/`)
    #[serde(rename = "bundles-dir")]
    pub bundles_dir: PathBuf,

    /// Recipe definitions directory
    #[serde(rename = "recipes-dir")]
    pub recipes_dir: PathBuf,

    /// Prompt fragment override directory
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: PathBuf,

    /// Thinking-event log file (JSONL)
    #[serde(rename = "events-file")]
    pub events_file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            turns_dir: PathBuf::from("turns"),
            workflows_dir: PathBuf::from("workflows"),
            bundles_dir: PathBuf::from("bundles"),
            recipes_dir: PathBuf::from("recipes"),
            prompts_dir: PathBuf::from("prompts"),
            events_file: None,
        }
    }
}

/// Validation thresholds and sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum validator confidence for APPROVE to stand
    #[serde(rename = "confidence-threshold")]
    pub confidence_threshold: f64,

    /// Relative tolerance when cross-checking prices
    #[serde(rename = "price-tolerance")]
    pub price_tolerance: f64,

    /// Per-file sandbox test timeout in seconds
    #[serde(rename = "sandbox-test-timeout-secs")]
    pub sandbox_test_timeout_secs: u64,

    /// Backups kept per original filename in self-extension
    #[serde(rename = "backup-keep-count")]
    pub backup_keep_count: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.70,
            price_tolerance: 0.05,
            sandbox_test_timeout_secs: 30,
            backup_keep_count: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.limits.max_retries, 3);
        assert_eq!(config.limits.max_research_calls, 2);
        assert_eq!(config.validation.confidence_threshold, 0.70);
        assert_eq!(config.storage.turns_dir, PathBuf::from("turns"));
    }

    #[test]
    fn test_load_from_yaml() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(
            &path,
            "llm:\n  model: test-model\n  max-tokens: 2048\nlimits:\n  max-retries: 5\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.llm.model, "test-model");
        assert_eq!(config.llm.max_tokens, 2048);
        assert_eq!(config.limits.max_retries, 5);
        // Unspecified fields keep defaults
        assert_eq!(config.limits.max_tool_calls, 20);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/config.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_broken_yaml_fails() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(&path, "llm: [unclosed").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
