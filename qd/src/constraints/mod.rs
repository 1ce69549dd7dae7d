//! Constraint extraction and checking
//!
//! Phase 2.5 scans the query and gathered context for explicit constraints
//! (file size, budget, time), normalizes them to standard units, and
//! persists `constraints.json`. A single shared checker guards every tool
//! call and the validator's pre-check.

mod checker;
mod extractor;
mod types;

pub use checker::{check_tool_call, Violation};
pub use extractor::ConstraintExtractor;
pub use types::{Constraint, ConstraintKind, ConstraintSet, ConstraintSource};

/// Canonical file name for the persisted constraint set
pub const CONSTRAINTS_DOC: &str = "constraints.json";
