//! TurnStore - per-turn filesystem persistence
//!
//! Every user request becomes a *turn*: a numbered directory holding all
//! documents produced while answering it (context document, plan state,
//! tool results, retry attempts). The manifest inside each turn directory
//! is the single source of truth for what the turn produced.
//!
//! # Architecture
//!
//! ```text
//! turns/
//! └── turn_000042/
//!     ├── manifest.json        # identity, docs created, token usage, status
//!     ├── user_query.md
//!     ├── context.md
//!     ├── constraints.json
//!     ├── plan_state.json
//!     ├── toolresults.md
//!     ├── attempt_1/           # archived prior attempt (verbatim copies)
//!     └── .backup/             # self-extension scratch
//! ```
//!
//! Turn IDs are zero-padded and monotonic per base directory
//! (`turn_000001`, `turn_000002`, ...). Allocation takes an exclusive
//! file lock so concurrent requests never mint the same ID.

pub mod cli;
mod error;
mod manifest;
mod turn;

pub use error::StoreError;
pub use manifest::{CacheHits, Manifest, TokenUsage};
pub use turn::{PathType, TurnDirectory, create_turn_directory, next_turn_id};

/// Manifest schema version written into every manifest.json
pub const MANIFEST_VERSION: &str = "1.0";

/// Lock file used to serialize turn-id allocation within a base directory
pub const TURN_LOCK_FILE: &str = ".turn_lock";
