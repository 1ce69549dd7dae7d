//! ContextDoc - the numbered-section context document
//!
//! Every turn owns one context document: an ordered sequence of numbered
//! sections (0..8) serialized deterministically to `context.md` before any
//! LLM call. The document also carries the claim ledger, the source
//! reference list, and the execution-state record that downstream phases
//! read and write.
//!
//! # Section layout
//!
//! ```text
//! §0 Query Analysis    # typed fields: action_needed, data_requirements, ...
//! §1 Validation        # reflection gate outcome + constraints block
//! §2 Context           # gathered prior turns and memory
//! §3 Plan              # strategic plan
//! §4 Execution         # iteration log, tool results, claims summary
//! §5 (reserved)
//! §6 Synthesis         # draft response
//! §7 Validation        # validator verdict
//! §8 Save              # final metrics
//! ```
//!
//! Sections are append-or-replace, never reordered, never deleted. Claims
//! without a `url` or `source_ref` are rejected at the ledger boundary.

pub mod cli;
mod claim;
mod document;
mod error;
mod search;

pub use claim::{Claim, ClaimLedger};
pub use document::{ContextDocument, Decision, ExecutionState, Mode, QueryAnalysis, Section};
pub use error::DocError;
pub use search::{search_turns, TurnMatch};

/// Highest valid section number
pub const MAX_SECTION: u8 = 8;

/// Default titles for the fixed section layout
pub const SECTION_TITLES: [&str; 9] = [
    "Query Analysis",
    "Validation",
    "Context",
    "Plan",
    "Execution",
    "Reserved",
    "Synthesis",
    "Validation",
    "Save",
];
