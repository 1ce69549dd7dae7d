//! QueryDaemon - LLM-driven orchestration engine
//!
//! Turns a user query into a validated answer by running a multi-phase
//! pipeline: analyze, validate, gather context, plan, execute tools
//! (possibly via workflows), synthesize, validate the response, persist.
//! Every turn is a fully auditable artifact: a numbered directory holding
//! every intermediate document, prompt, tool result, claim, and retry
//! attempt.
//!
//! # Core Concepts
//!
//! - **Turns**: one request = one `turn_NNNNNN` directory (see `turnstore`)
//! - **Context document**: numbered sections 0..8 serialized to `context.md`
//!   before every LLM call (see `contextdoc`)
//! - **Three nested loops**: planning issues routes, the executor issues
//!   natural-language commands, the coordinator picks workflows one step
//!   at a time
//! - **Budgeted packs**: every prompt is assembled from a recipe under a
//!   hard token budget
//! - **Validated answers**: a validator approves, revises, or forces a
//!   retry with the prior attempt archived verbatim
//!
//! # Modules
//!
//! - [`pack`] - recipe-driven prompt assembly with token budgets
//! - [`tools`] - tool catalog, permission gate, constraint-checked executor
//! - [`workflow`] - YAML-fronted markdown workflows and the step runner
//! - [`constraints`] - constraint extraction and checking
//! - [`planning`] - plan state and the planning loop
//! - [`loops`] - coordinator and executor loops
//! - [`extension`] - self-extension pipeline (spec, backup, sandbox, register)
//! - [`phases`] - the phase runner that owns a request end to end
//! - [`validation`] - validation decisions and the retry controller

pub mod cli;
pub mod config;
pub mod constraints;
pub mod events;
pub mod extension;
pub mod llm;
pub mod loops;
pub mod pack;
pub mod phases;
pub mod planning;
pub mod prompts;
pub mod tools;
pub mod validation;
pub mod workflow;

// Re-export commonly used types
pub use config::{Config, LimitsConfig, LlmConfig, StorageConfig, ToolServerConfig, ValidationConfig};
pub use llm::{CompletionRequest, CompletionResponse, HttpLlmClient, LlmClient, LlmError, Role};
pub use pack::{DocPack, PackBuilder, PackError, PackItem, Recipe};
pub use tools::{ApprovalBroker, GateDecision, ToolCatalog, ToolError, ToolExecutor};
pub use validation::{Decision, ValidationResult};
pub use workflow::{StepRunner, Workflow, WorkflowRegistry, WorkflowResult};
