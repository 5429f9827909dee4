//! Plan validation for taskbridge.
//!
//! Two independent validators share the [`RejectionReason`] vocabulary:
//! [`PlanningPolicy`] runs at the orchestrator before a plan is dispatched,
//! [`ExecutionPolicy`] runs at the connector before a plan executes.
//!
//! [`RejectionReason`]: taskbridge_protocol::RejectionReason

use std::collections::BTreeSet;

pub mod execution;
pub mod planning;
pub mod sandbox;

pub use execution::{ExecutionPolicy, ExecutionPolicyConfig};
pub use planning::{PlanningPolicy, PlanningPolicyConfig, RATE_WINDOW};
pub use sandbox::{safe_canonicalize, PathSandbox};

/// Actions provided by the built-in workflow.
pub const DEFAULT_ACTIONS: [&str; 4] = [
    "scan_directory",
    "generate_report",
    "summarise_text",
    "post_summary",
];

pub(crate) fn default_actions() -> BTreeSet<String> {
    DEFAULT_ACTIONS.iter().map(|a| a.to_string()).collect()
}
