//! The nested control loops
//!
//! Three levels: the planning loop (phase 3) routes the turn, the
//! executor loop issues natural-language commands, and the coordinator
//! picks workflows one step at a time. All three share the same guard
//! machinery and service handles.

mod coordinator;
mod executor;
mod guards;
mod services;

pub use coordinator::{Coordinator, CoordinatorOutcome};
pub use executor::{ExecutorLoop, ExecutorOutcome};
pub use guards::{hash_args, looks_like_search, CircularCallDetector, CommandLedger, ResearchGuard};
pub use services::{write_context, LoopServices};
#[cfg(test)]
pub(crate) use services::testing;
