//! Planning - plan state, strategic plans, and the planning loop
//!
//! Phase 3's outer controller. The planner LLM emits a strategic plan that
//! routes the turn; plan state tracks goals, constraints, and violations
//! across phases.

mod r#loop;
mod state;
mod strategic;

pub use r#loop::{ContextRefresher, NoopRefresher, PlanningLoop, PlanningOutcome};
pub use state::{Goal, PlanState, PlanStateManager, ToolCreationFailure, ViolationRecord};
pub use strategic::{extract_json, Route, StrategicPlan};

/// Canonical file name for persisted plan state
pub const PLAN_STATE_DOC: &str = "plan_state.json";
