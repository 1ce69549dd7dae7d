//! Tool system - catalog, permission gate, constraint-checked executor
//!
//! Tools are named callables with a uniform `args -> result` contract,
//! optionally gated by mode. The catalog is process-wide; the executor
//! wraps every call with constraint checks, permission gating, and
//! argument enrichment, and extracts claims from results.

mod bundle;
mod catalog;
mod error;
mod executor;
mod gate;
mod registration;
mod server;

pub use bundle::{load_tool_bundle, parse_frontmatter, ToolSpecFrontmatter};
#[cfg(test)]
pub(crate) use catalog::testing;
pub use catalog::{resolve_tool_uri, ToolCatalog, ToolHandler, ToolMode, ToolRegistration};
pub use error::ToolError;
pub use executor::{extract_claims, ToolCallOutcome, ToolExecutor};
pub use gate::{ApprovalBroker, GateDecision, PermissionGate};
pub use registration::register_standard_tools;
pub use server::{RemoteTool, ToolServerClient};
