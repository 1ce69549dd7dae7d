//! Plan state - goals, constraints, violations

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use turnstore::{PathType, TurnDirectory};

use crate::constraints::{ConstraintSet, Violation};

use super::PLAN_STATE_DOC;

/// One goal of the strategic plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,

    /// `pending` | `fulfilled` | `partial` | `unfulfilled`
    pub status: String,
}

/// Constraint tracking entry inside plan state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintStatus {
    pub id: String,

    /// `active` | `violated`
    pub status: String,
}

/// A recorded constraint violation with phase attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub constraint_id: String,
    pub reason: String,
    pub phase: u8,
}

/// A failed self-extension attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCreationFailure {
    pub tool: String,
    pub reason: String,
    pub paths: Vec<String>,
}

/// The persisted `plan_state.json` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanState {
    pub goals: Vec<Goal>,
    pub constraints: Vec<ConstraintStatus>,
    pub violations: Vec<ViolationRecord>,
    pub last_updated_phase: u8,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_creation_failures: Vec<ToolCreationFailure>,
}

/// Loads, mutates, and persists plan state for a turn
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanStateManager;

impl PlanStateManager {
    /// Normalize heterogeneous goal representations
    ///
    /// Accepts `{id, description}`, `{goal_id, goal}`, or bare strings;
    /// missing ids become `GOAL_n`.
    pub fn normalize_goals(&self, goals: &[Value]) -> Vec<Goal> {
        goals
            .iter()
            .enumerate()
            .map(|(idx, goal)| {
                let (id, description) = match goal {
                    Value::Object(map) => {
                        let id = map
                            .get("id")
                            .or_else(|| map.get("goal_id"))
                            .and_then(Value::as_str)
                            .map(String::from)
                            .unwrap_or_else(|| format!("GOAL_{}", idx + 1));
                        let description = map
                            .get("description")
                            .or_else(|| map.get("goal"))
                            .and_then(Value::as_str)
                            .map(String::from)
                            .unwrap_or_else(|| goal.to_string());
                        (id, description)
                    }
                    other => (
                        format!("GOAL_{}", idx + 1),
                        other.as_str().map(String::from).unwrap_or_else(|| other.to_string()),
                    ),
                };
                Goal {
                    id,
                    description,
                    status: "pending".to_string(),
                }
            })
            .collect()
    }

    /// Initialize `plan_state.json` from the strategic plan's goals
    ///
    /// Constraint entries come from the already-persisted constraint set.
    /// With `overwrite=false`, an existing plan state is left alone.
    pub fn initialize(
        &self,
        turn_dir: &TurnDirectory,
        goals: &[Value],
        phase: u8,
        overwrite: bool,
    ) -> std::io::Result<PlanState> {
        if !overwrite {
            if let Some(existing) = self.load(turn_dir) {
                return Ok(existing);
            }
        }

        let constraint_set = ConstraintSet::load(turn_dir);
        let state = PlanState {
            goals: self.normalize_goals(goals),
            constraints: constraint_set
                .constraints
                .iter()
                .map(|c| ConstraintStatus {
                    id: c.id.clone(),
                    status: "active".to_string(),
                })
                .collect(),
            violations: Vec::new(),
            last_updated_phase: phase,
            tool_creation_failures: Vec::new(),
        };
        self.save(turn_dir, &state)?;
        debug!(goals = state.goals.len(), "PlanStateManager::initialize: wrote plan state");
        Ok(state)
    }

    pub fn load(&self, turn_dir: &TurnDirectory) -> Option<PlanState> {
        let path = turn_dir.doc_path(PLAN_STATE_DOC, PathType::Turn);
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn save(&self, turn_dir: &TurnDirectory, state: &PlanState) -> std::io::Result<()> {
        let path = turn_dir.doc_path(PLAN_STATE_DOC, PathType::Turn);
        std::fs::write(path, serde_json::to_string_pretty(state).unwrap_or_default())
    }

    /// Record a violation cumulatively and flip the constraint to violated
    pub fn record_violation(&self, turn_dir: &TurnDirectory, violation: &Violation, phase: u8) -> std::io::Result<()> {
        let mut state = self.load(turn_dir).unwrap_or_default();
        info!(
            "[PlanState] Recording violation of {} at phase {}: {}",
            violation.constraint_id, phase, violation.reason
        );
        state.violations.push(ViolationRecord {
            constraint_id: violation.constraint_id.clone(),
            reason: violation.reason.clone(),
            phase,
        });
        state.last_updated_phase = phase;
        for constraint in &mut state.constraints {
            if constraint.id == violation.constraint_id {
                constraint.status = "violated".to_string();
            }
        }
        self.save(turn_dir, &state)
    }

    /// Record a failed self-extension attempt
    pub fn record_tool_creation_failure(
        &self,
        turn_dir: &TurnDirectory,
        failure: ToolCreationFailure,
    ) -> std::io::Result<()> {
        let mut state = self.load(turn_dir).unwrap_or_default();
        state.tool_creation_failures.push(failure);
        self.save(turn_dir, &state)
    }

    /// Apply validator feedback: a failed constraints check becomes a
    /// phase-7 violation
    pub fn update_from_validation(
        &self,
        turn_dir: &TurnDirectory,
        constraints_respected: Option<bool>,
    ) -> std::io::Result<()> {
        if constraints_respected == Some(false) {
            self.record_violation(
                turn_dir,
                &Violation {
                    constraint_id: "constraints".to_string(),
                    reason: "Validator reported constraint violation".to_string(),
                },
                7,
            )?;
        }
        Ok(())
    }

    /// Update goal statuses from validator goal reports
    pub fn update_goal_statuses(&self, turn_dir: &TurnDirectory, statuses: &[(String, String)]) -> std::io::Result<()> {
        let mut state = self.load(turn_dir).unwrap_or_default();
        for (goal_id, status) in statuses {
            if let Some(goal) = state.goals.iter_mut().find(|g| &g.id == goal_id) {
                goal.status = status.clone();
            }
        }
        self.save(turn_dir, &state)
    }
}
