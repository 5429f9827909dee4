use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use taskbridge_protocol::{RejectionReason, TaskPlan};
use tracing::warn;

use crate::default_actions;

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanningPolicyConfig {
    pub rate_limit_per_minute: usize,
    pub max_steps_per_plan: usize,
    pub allowed_actions: BTreeSet<String>,
}

impl Default for PlanningPolicyConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 10,
            max_steps_per_plan: 20,
            allowed_actions: default_actions(),
        }
    }
}

/// Orchestrator-side checks run once per objective, before dispatch.
///
/// Order is fixed: rate limit, step count, action allowlist. The first
/// failure wins.
#[derive(Debug)]
pub struct PlanningPolicy {
    config: PlanningPolicyConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl PlanningPolicy {
    pub fn new(config: PlanningPolicyConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PlanningPolicyConfig {
        &self.config
    }

    pub fn validate(&self, identity: Option<&str>, plan: &TaskPlan) -> Option<RejectionReason> {
        self.validate_at(identity, plan, Instant::now())
    }

    pub fn validate_at(
        &self,
        identity: Option<&str>,
        plan: &TaskPlan,
        now: Instant,
    ) -> Option<RejectionReason> {
        if let Some(identity) = identity {
            if !self.record_request(identity, now) {
                warn!(
                    identity = %identity,
                    limit = self.config.rate_limit_per_minute,
                    task_id = %plan.task_id(),
                    "Rate limit exceeded"
                );
                return Some(RejectionReason::QuotaExceeded);
            }
        }

        if plan.steps().len() > self.config.max_steps_per_plan {
            return Some(RejectionReason::PolicyViolation);
        }

        plan.steps()
            .iter()
            .any(|step| !self.config.allowed_actions.contains(&step.action))
            .then_some(RejectionReason::ActionNotAllowed)
    }

    /// Number of identities currently holding a rate-limit window.
    pub fn tracked_identities(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // Records one request for `identity` unless its window is already full.
    fn record_request(&self, identity: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        windows.retain(|_, window| {
            prune(window, now);
            !window.is_empty()
        });

        let window = windows.entry(identity.to_string()).or_default();
        if window.len() >= self.config.rate_limit_per_minute {
            return false;
        }
        window.push_back(now);
        true
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = window.front() {
        if now.saturating_duration_since(*front) >= RATE_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
