//! Turn manifest - the single source of truth for what a turn produced

use std::collections::BTreeMap;
use std::fs;

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::turn::{PathType, TurnDirectory};
use crate::MANIFEST_VERSION;

/// Cache hit tracking per turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheHits {
    pub response: bool,
    pub claims: bool,
    #[serde(default)]
    pub tool: BTreeMap<String, bool>,
}

/// Token usage accounting, total plus per-phase breakdown
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total: u64,
    #[serde(default)]
    pub by_phase: BTreeMap<String, u64>,
}

impl TokenUsage {
    /// Add tokens to a phase and to the running total
    pub fn add(&mut self, phase: &str, tokens: u64) {
        self.total += tokens;
        *self.by_phase.entry(phase.to_string()).or_insert(0) += tokens;
    }
}

/// Manifest recording a turn's identity and everything it produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub turn_id: String,
    pub session_id: String,
    pub trace_id: String,
    pub mode: String,

    /// RFC3339 creation timestamp
    pub timestamp: String,

    /// `in_progress` | `completed` | `error`
    pub status: String,

    pub docs_created: Vec<String>,
    pub docs_referenced: Vec<String>,

    pub cache_hits: CacheHits,
    pub token_usage: TokenUsage,

    /// First 100 chars of the user query
    pub user_query_preview: Option<String>,

    /// Unix seconds
    pub created_at: i64,
    pub updated_at: i64,

    /// Stamped by finalize
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,

    pub manifest_version: String,
}

impl Manifest {
    /// Initialize a fresh manifest for a turn
    pub fn new(turn_dir: &TurnDirectory, user_query: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            turn_id: turn_dir.turn_id.clone(),
            session_id: turn_dir.session_id.clone(),
            trace_id: turn_dir.trace_id.clone(),
            mode: turn_dir.mode.clone(),
            timestamp: now.to_rfc3339(),
            status: "in_progress".to_string(),
            docs_created: Vec::new(),
            docs_referenced: Vec::new(),
            cache_hits: CacheHits::default(),
            token_usage: TokenUsage::default(),
            user_query_preview: user_query.map(|q| q.chars().take(100).collect()),
            created_at: now.timestamp(),
            updated_at: now.timestamp(),
            archived_at: None,
            manifest_version: MANIFEST_VERSION.to_string(),
        }
    }

    /// Record a created document (deduped)
    pub fn record_doc_created(&mut self, doc_name: &str) {
        if !self.docs_created.iter().any(|d| d == doc_name) {
            self.docs_created.push(doc_name.to_string());
        }
    }

    /// Record a referenced document (deduped)
    pub fn record_doc_referenced(&mut self, doc_name: &str) {
        if !self.docs_referenced.iter().any(|d| d == doc_name) {
            self.docs_referenced.push(doc_name.to_string());
        }
    }

    /// Record token usage for a phase
    pub fn record_token_usage(&mut self, phase: &str, tokens: u64) {
        self.token_usage.add(phase, tokens);
    }

    /// Record a tool cache hit
    pub fn record_tool_cache_hit(&mut self, tool: &str, hit: bool) {
        self.cache_hits.tool.insert(tool.to_string(), hit);
    }

    /// Persist to `manifest.json`, stamping `updated_at`
    pub fn save(&mut self, turn_dir: &TurnDirectory) -> Result<(), StoreError> {
        self.updated_at = Utc::now().timestamp();
        let path = turn_dir.doc_path("manifest.json", PathType::Turn);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        debug!("[TurnDir] Saved manifest.json ({} docs)", self.docs_created.len());
        Ok(())
    }

    /// Load from `manifest.json`
    pub fn load(turn_dir: &TurnDirectory) -> Result<Self, StoreError> {
        let path = turn_dir.doc_path("manifest.json", PathType::Turn);
        if !path.exists() {
            return Err(StoreError::MissingManifest {
                path: turn_dir.path.clone(),
            });
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Seal the manifest with a terminal status and archive timestamp
    pub fn finalize(&mut self, turn_dir: &TurnDirectory, status: &str) -> Result<(), StoreError> {
        self.status = status.to_string();
        self.archived_at = Some(Utc::now().to_rfc3339());
        self.save(turn_dir)?;
        info!("[TurnDir] Finalized {} as {}", self.turn_id, status);
        Ok(())
    }
}
