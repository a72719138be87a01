// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution identifiers, states, and records.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sp_error::SkillError;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionId
// ---------------------------------------------------------------------------

/// Opaque execution identifier.
///
/// Skill invocations render as `exec_<hex>`, workflow executions as
/// `exec_wf_<hex>`; both match `^exec_[A-Za-z0-9_]+$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a fresh invocation identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("exec_{}", Uuid::new_v4().simple()))
    }

    /// Generate a fresh workflow-execution identifier.
    #[must_use]
    pub fn new_workflow() -> Self {
        Self(format!("exec_wf_{}", Uuid::new_v4().simple()))
    }

    /// Parse an identifier supplied by a caller.
    ///
    /// Accepts exactly the documented shape; anything else returns `None` so
    /// lookups can answer `not_found` without touching storage.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix("exec_")?;
        if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    /// Returns `true` if this identifies a workflow execution.
    #[must_use]
    pub fn is_workflow(&self) -> bool {
        self.0.starts_with("exec_wf_")
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

/// Lifecycle state of one execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Accepted, waiting for a worker.
    Pending,
    /// A worker is executing the sandbox job.
    Running,
    /// Finished successfully; `result` is set.
    Completed,
    /// Finished with a guest or validation error; `error` is set.
    Failed,
    /// The effective deadline expired; `error` is set.
    TimedOut,
    /// Cancelled before completion; `error` is set.
    Cancelled,
}

impl ExecutionState {
    /// Returns `true` for states that can never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// The set of states that may legally follow `self`.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [ExecutionState] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[
                Self::Completed,
                Self::Failed,
                Self::TimedOut,
                Self::Cancelled,
            ],
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled => &[],
        }
    }

    /// Returns `true` if moving from `self` to `next` is legal.
    #[must_use]
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// One tracked execution of a skill against one inputs payload.
///
/// `result` and `error` are mutually exclusive: `result` is set iff the
/// record is `completed`, `error` iff it is `failed`, `timed_out`, or
/// `cancelled`. Transitions go through [`ExecutionRecord::transition`],
/// which enforces the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Server-generated identifier.
    pub execution_id: ExecutionId,
    /// Skill this execution runs.
    pub skill_id: String,
    /// Version resolved at scheduling time.
    pub skill_version: Version,
    /// Current lifecycle state.
    pub state: ExecutionState,
    /// Snapshot of the inputs payload.
    pub inputs: Value,
    /// Output value; set iff `state == completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description; set iff the record ended unsuccessfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SkillError>,
    /// When the record was created (entered `pending`).
    pub created_at: DateTime<Utc>,
    /// When a worker claimed the record (entered `running`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the record reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock seconds between `started_at` and `completed_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
}

impl ExecutionRecord {
    /// Create a fresh `pending` record for the given skill and inputs.
    pub fn new(skill_id: impl Into<String>, skill_version: Version, inputs: Value) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            skill_id: skill_id.into(),
            skill_version,
            state: ExecutionState::Pending,
            inputs,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            elapsed_seconds: None,
        }
    }

    /// Returns `true` once the record reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Advance the state machine, stamping timestamps as a side effect.
    ///
    /// Returns `false` (leaving the record untouched) if the transition is
    /// not legal, which keeps terminal states sticky under races.
    pub fn transition(&mut self, next: ExecutionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            ExecutionState::Running => self.started_at = Some(now),
            _ if next.is_terminal() => {
                self.completed_at = Some(now);
                let from = self.started_at.unwrap_or(self.created_at);
                self.elapsed_seconds =
                    Some((now - from).num_milliseconds().max(0) as f64 / 1000.0);
            }
            _ => {}
        }
        self.state = next;
        true
    }

    /// Transition to `completed` with the given result value.
    pub fn complete(&mut self, result: Value) -> bool {
        if !self.transition(ExecutionState::Completed) {
            return false;
        }
        self.result = Some(result);
        true
    }

    /// Transition to the given failure state carrying `error`.
    ///
    /// `state` must be one of `failed`, `timed_out`, `cancelled`.
    pub fn fail(&mut self, state: ExecutionState, error: SkillError) -> bool {
        debug_assert!(state.is_terminal() && state != ExecutionState::Completed);
        if !self.transition(state) {
            return false;
        }
        self.error = Some(error);
        true
    }
}
