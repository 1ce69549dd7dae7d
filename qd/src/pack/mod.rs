//! Doc pack builder - recipe-driven prompt assembly under token budgets
//!
//! A *recipe* declares prompt fragments, input documents, and a token
//! budget. Building a *pack* loads everything, compresses input docs to
//! their allotments, and fails hard if the result cannot fit. Every LLM
//! call in the engine goes through a pack.

mod builder;
mod compress;
mod error;
mod recipe;

pub use builder::{DocPack, PackBuilder, PackItem, PackItemKind};
pub use compress::{count_tokens, extract_key_lines, truncate_to_tokens, CompressionStrategy, Compressor};
pub use error::PackError;
pub use recipe::{InputDocSpec, LlmParams, Recipe, TokenBudget, TrimMethod, TrimmingStrategy};

/// Docs that are never blind-truncated when a smarter path exists
pub const CRITICAL_DOCS: [&str; 3] = ["context.md", "bundle.json", "findings.json"];

/// Minimum token allotment per input doc
pub const MIN_DOC_BUDGET: usize = 100;
