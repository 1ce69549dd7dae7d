//! Response validation and the retry controller
//!
//! The validator LLM judges the draft answer; deterministic cross-checks
//! verify every URL and price against tool results, the execution log,
//! and gathered context. Overrides convert over-confident APPROVEs into
//! retries; a retry archives the attempt and invalidates failed claims.

mod controller;
mod crosscheck;
mod result;

pub use controller::ValidationController;
pub use crosscheck::{crosscheck_response, CrosscheckReport};
pub use result::{Checks, Decision, FailureContext, GoalStatus, ValidationResult};
