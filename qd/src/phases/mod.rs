//! The phase pipeline
//!
//! The phase runner owns a request end to end: validation gate, context
//! gathering, constraint extraction, the planning/synthesis/validation
//! retry loop, and Save. Every phase is timed and token-accounted through
//! [`PhaseMetrics`].

mod context;
mod metrics;
mod reflection;
mod runner;
mod synthesis;

pub use context::gather_context;
pub use metrics::{PhaseMetrics, PhaseStats};
pub use reflection::{run_reflection, ReflectionDecision};
pub use runner::{MultiTaskHandler, PhaseRunner, TurnRequest, TurnResponse};
pub use synthesis::{run_synthesis, SynthesisOutcome};
