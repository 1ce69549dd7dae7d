//! Workflow engine - declarative tool sequences
//!
//! Workflows are markdown files with YAML frontmatter declaring triggers,
//! typed inputs/outputs, an ordered step list, success criteria, and a
//! fallback. The registry indexes them by name, intent, and trigger; the
//! step runner executes them against the tool catalog with `{{var}}`
//! interpolation.

mod definition;
mod error;
mod interpolate;
mod registry;
mod runner;

pub use definition::{Fallback, InputSpec, OutputSpec, Step, Workflow};
#[cfg(test)]
pub(crate) use definition::testing;
pub use error::WorkflowError;
pub use interpolate::{evaluate_condition, evaluate_criterion, interpolate_args};
pub use registry::WorkflowRegistry;
pub use runner::{StepRunner, WorkflowResult};
