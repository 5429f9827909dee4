use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use taskbridge_protocol::{ExecutionResult, StepResult, TaskPlan, TaskStep};
use tracing::{debug, info, warn};

use crate::registry::ActionRegistry;

/// Runs plan steps one after another against an [`ActionRegistry`].
///
/// Every step is attempted exactly once, in order. A failing step is
/// recorded and execution moves on; nothing short-circuits. Each handler
/// sees the output of the most recent step that succeeded.
#[derive(Clone, Debug)]
pub struct Executor {
    registry: Arc<ActionRegistry>,
}

impl Executor {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn execute(&self, plan: &TaskPlan) -> ExecutionResult {
        let mut step_results = Vec::with_capacity(plan.steps().len());
        let mut previous: Option<Value> = None;

        for (index, step) in plan.steps().iter().enumerate() {
            let result = self.run_step(plan.task_id(), index, step, previous.as_ref());
            if let Some(output) = &result.output {
                previous = Some(output.clone());
            }
            step_results.push(result);
        }

        let result = ExecutionResult::from_steps(plan.task_id(), step_results);
        info!(
            task_id = %result.task_id,
            status = %result.status,
            steps = result.step_results.len(),
            "Plan executed"
        );
        result
    }

    fn run_step(
        &self,
        task_id: &str,
        index: usize,
        step: &TaskStep,
        previous: Option<&Value>,
    ) -> StepResult {
        let handler = match self.registry.lookup(&step.action) {
            Ok(handler) => handler,
            Err(missing) => {
                warn!(%task_id, step = index, action = %step.action, "No handler registered");
                return StepResult::failed(&step.action, missing.to_string());
            }
        };

        debug!(%task_id, step = index, action = %step.action, "Running step");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler.call(&step.params, previous)
        }));

        match outcome {
            Ok(Ok(output)) => StepResult::completed(&step.action, output),
            Ok(Err(err)) => {
                warn!(%task_id, step = index, action = %step.action, "Step failed: {:#}", err);
                StepResult::failed(&step.action, format!("{err:#}"))
            }
            Err(_) => {
                warn!(%task_id, step = index, action = %step.action, "Step handler panicked");
                StepResult::failed(&step.action, "action handler panicked")
            }
        }
    }
}
