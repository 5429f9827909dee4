use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;

pub const DEFAULT_MAX_DURATION_SECS: u64 = 300;

/// Step parameters, keyed by name.
pub type Params = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Local,
    External,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskStep {
    pub kind: StepKind,
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

impl TaskStep {
    pub fn local(action: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Local,
            action: action.into(),
            params: Params::new(),
        }
    }

    pub fn external(action: impl Into<String>) -> Self {
        Self {
            kind: StepKind::External,
            action: action.into(),
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskConstraints {
    pub no_delete: bool,
    pub require_user_confirmation: bool,
    pub allowed_paths: BTreeSet<String>,
    pub max_duration_seconds: u64,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self {
            no_delete: true,
            require_user_confirmation: true,
            allowed_paths: BTreeSet::new(),
            max_duration_seconds: DEFAULT_MAX_DURATION_SECS,
        }
    }
}

/// An ordered, non-empty list of steps plus the constraints they run under.
///
/// Plans are built once by a planner and only ever read afterwards, so the
/// fields are private and there are no setters. Deserialisation goes through
/// the same non-empty check as [`TaskPlan::new`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "TaskPlanWire")]
pub struct TaskPlan {
    task_id: String,
    steps: Vec<TaskStep>,
    constraints: TaskConstraints,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TaskPlanWire {
    task_id: String,
    steps: Vec<TaskStep>,
    #[serde(default)]
    constraints: TaskConstraints,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskPlanWire> for TaskPlan {
    type Error = ProtocolError;

    fn try_from(wire: TaskPlanWire) -> Result<Self, Self::Error> {
        if wire.task_id.trim().is_empty() {
            return Err(ProtocolError::InvalidPayload("missing task_id".into()));
        }
        if wire.steps.is_empty() {
            return Err(ProtocolError::EmptyPlan);
        }
        Ok(Self {
            task_id: wire.task_id,
            steps: wire.steps,
            constraints: wire.constraints,
            created_at: wire.created_at,
        })
    }
}

impl TaskPlan {
    pub fn new(steps: Vec<TaskStep>, constraints: TaskConstraints) -> Result<Self, ProtocolError> {
        if steps.is_empty() {
            return Err(ProtocolError::EmptyPlan);
        }
        Ok(Self {
            task_id: new_task_id(),
            steps,
            constraints,
            created_at: Utc::now(),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn steps(&self) -> &[TaskStep] {
        &self.steps
    }

    pub fn constraints(&self) -> &TaskConstraints {
        &self.constraints
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// `task_` followed by twelve hex characters from a v4 UUID.
pub fn new_task_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("task_{}", &simple[..12])
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub action: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn completed(action: impl Into<String>, output: Value) -> Self {
        Self {
            action: action.into(),
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Partial,
    Rejected,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Partial => "partial",
            TaskStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of reasons a whole plan can be refused.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    DeviceNotPaired,
    InvalidSignature,
    PolicyViolation,
    QuotaExceeded,
    ActionNotAllowed,
    PathNotAllowed,
    Unknown,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::DeviceNotPaired => "device_not_paired",
            RejectionReason::InvalidSignature => "invalid_signature",
            RejectionReason::PolicyViolation => "policy_violation",
            RejectionReason::QuotaExceeded => "quota_exceeded",
            RejectionReason::ActionNotAllowed => "action_not_allowed",
            RejectionReason::PathNotAllowed => "path_not_allowed",
            RejectionReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Aggregates per-step outcomes. Later outputs for a repeated action
    /// replace earlier ones in `outputs`; `step_results` keeps every step.
    pub fn from_steps(task_id: impl Into<String>, step_results: Vec<StepResult>) -> Self {
        let status = aggregate_status(&step_results);
        let mut outputs = BTreeMap::new();
        for step in &step_results {
            if let (StepStatus::Completed, Some(output)) = (step.status, step.output.as_ref()) {
                outputs.insert(step.action.clone(), output.clone());
            }
        }
        Self {
            task_id: task_id.into(),
            status,
            step_results,
            outputs,
            reason: None,
            completed_at: Utc::now(),
        }
    }

    pub fn rejected(task_id: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Rejected,
            step_results: Vec::new(),
            outputs: BTreeMap::new(),
            reason: Some(reason),
            completed_at: Utc::now(),
        }
    }
}

fn aggregate_status(step_results: &[StepResult]) -> TaskStatus {
    if step_results.iter().all(StepResult::is_completed) {
        TaskStatus::Completed
    } else if step_results.iter().all(|s| !s.is_completed()) {
        TaskStatus::Failed
    } else {
        TaskStatus::Partial
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    pub user_id: String,
    pub device_id: String,
    pub public_key: String,
    pub capabilities: BTreeSet<String>,
    pub paired_at: DateTime<Utc>,
}
