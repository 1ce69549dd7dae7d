//! Constraint types

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use turnstore::{PathType, TurnDirectory};

use super::CONSTRAINTS_DOC;

/// Where a constraint was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSource {
    /// Extracted from the current query
    Extracted,
    /// Found in gathered context (session preferences, prior turns)
    Context,
}

/// The typed payload of a constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    FileSize {
        max_bytes: u64,
    },
    Budget {
        max_amount: f64,
    },
    Time {
        max_minutes: u64,
    },
    Privacy {
        no_external_calls: bool,
    },
    MustAvoid {
        terms: Vec<String>,
    },
    Availability {
        requirement: String,
    },
    Location {
        requirement: String,
    },
    BlockedTools {
        tools: Vec<String>,
    },
    BlockedDomains {
        domains: Vec<String>,
    },
}

impl ConstraintKind {
    /// The `type` tag this kind serializes under
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::FileSize { .. } => "file_size",
            Self::Budget { .. } => "budget",
            Self::Time { .. } => "time",
            Self::Privacy { .. } => "privacy",
            Self::MustAvoid { .. } => "must_avoid",
            Self::Availability { .. } => "availability",
            Self::Location { .. } => "location",
            Self::BlockedTools { .. } => "blocked_tools",
            Self::BlockedDomains { .. } => "blocked_domains",
        }
    }
}

/// One constraint with identity and provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,

    #[serde(flatten)]
    pub kind: ConstraintKind,

    pub source: ConstraintSource,

    /// The text that was matched
    pub original_text: String,
}

/// The persisted `constraints.json` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub constraints: Vec<Constraint>,
}

impl ConstraintSet {
    /// Load from a turn directory; absent or broken files yield an empty set
    pub fn load(turn_dir: &TurnDirectory) -> Self {
        let path = turn_dir.doc_path(CONSTRAINTS_DOC, PathType::Turn);
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Persist to the turn directory
    pub fn save(&self, turn_dir: &TurnDirectory) -> std::io::Result<()> {
        let path = turn_dir.doc_path(CONSTRAINTS_DOC, PathType::Turn);
        fs::write(path, serde_json::to_string_pretty(self).unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Render the §1 constraints block
    pub fn to_markdown_block(&self) -> String {
        if self.constraints.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Constraints\n\n");
        for c in &self.constraints {
            out.push_str(&format!(
                "- `{}` ({}): {}\n",
                c.id,
                c.kind.type_name(),
                c.original_text
            ));
        }
        out
    }
}
