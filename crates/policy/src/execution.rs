use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskbridge_protocol::{RejectionReason, TaskPlan, TaskStep};
use tracing::warn;

use crate::default_actions;
use crate::sandbox::PathSandbox;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionPolicyConfig {
    pub allowed_actions: BTreeSet<String>,
    /// Roots a path parameter must resolve under. `~` is expanded.
    pub allowed_roots: Vec<String>,
    /// Step parameter names treated as filesystem paths.
    pub path_params: Vec<String>,
}

impl Default for ExecutionPolicyConfig {
    fn default() -> Self {
        Self {
            allowed_actions: default_actions(),
            allowed_roots: vec![
                "~/projects".to_string(),
                "~/Documents".to_string(),
                "/tmp".to_string(),
                "./demo_projects".to_string(),
            ],
            path_params: vec!["path".to_string()],
        }
    }
}

/// Connector-side checks run just before a verified plan executes.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    config: ExecutionPolicyConfig,
    sandbox: PathSandbox,
}

impl ExecutionPolicy {
    /// Relative paths resolve against the current working directory.
    pub fn new(config: ExecutionPolicyConfig) -> Self {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::with_base_dir(config, base)
    }

    pub fn with_base_dir(config: ExecutionPolicyConfig, base_dir: impl Into<PathBuf>) -> Self {
        let sandbox = PathSandbox::new(base_dir, config.allowed_roots.clone());
        Self { config, sandbox }
    }

    pub fn config(&self) -> &ExecutionPolicyConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    /// Checks each step in order (action first, then its path parameters)
    /// and returns the first failure.
    pub fn validate(&self, plan: &TaskPlan) -> Option<RejectionReason> {
        let plan_paths: Vec<&String> = plan.constraints().allowed_paths.iter().collect();

        for (index, step) in plan.steps().iter().enumerate() {
            if !self.config.allowed_actions.contains(&step.action) {
                warn!(
                    task_id = %plan.task_id(),
                    step = index,
                    action = %step.action,
                    "Action not allowed on this device"
                );
                return Some(RejectionReason::ActionNotAllowed);
            }
            if let Some(reason) = self.check_paths(plan, index, step, &plan_paths) {
                return Some(reason);
            }
        }
        None
    }

    fn check_paths(
        &self,
        plan: &TaskPlan,
        index: usize,
        step: &TaskStep,
        plan_paths: &[&String],
    ) -> Option<RejectionReason> {
        for name in &self.config.path_params {
            let Some(value) = step.params.get(name) else {
                continue;
            };
            let allowed = match value {
                Value::String(raw) => {
                    self.sandbox.contains(raw)
                        && (plan_paths.is_empty() || self.sandbox.contains_within(raw, plan_paths))
                }
                _ => false,
            };
            if !allowed {
                warn!(
                    task_id = %plan.task_id(),
                    step = index,
                    param = %name,
                    value = %value,
                    "Path outside allowed roots"
                );
                return Some(RejectionReason::PathNotAllowed);
            }
        }
        None
    }
}
