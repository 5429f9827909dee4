//! Objective to plan.

use anyhow::Result;
use taskbridge_protocol::{TaskConstraints, TaskPlan, TaskStep};

/// Turns a free-text objective into a plan. Implementations must not have
/// side effects the orchestrator can observe.
pub trait Planner: Send + Sync {
    fn plan(&self, objective: &str) -> Result<TaskPlan>;
}

const SCAN_WORDS: &[&str] = &[
    "scan", "list", "find", "search", "directory", "repo", "project",
];
const REPORT_WORDS: &[&str] = &[
    "report", "summary", "summarise", "summarize", "digest", "weekly", "daily",
];
const POST_WORDS: &[&str] = &["post", "send", "publish", "share", "slack", "email", "notify"];

/// Maps keyword classes in the objective onto the built-in weekly workflow:
/// scan, then report, then post. Objectives matching none of them are
/// summarised.
#[derive(Debug, Clone)]
pub struct KeywordPlanner {
    scan_path: String,
}

impl KeywordPlanner {
    pub fn new(scan_path: impl Into<String>) -> Self {
        Self {
            scan_path: scan_path.into(),
        }
    }
}

impl Default for KeywordPlanner {
    fn default() -> Self {
        Self::new("./demo_projects")
    }
}

impl Planner for KeywordPlanner {
    fn plan(&self, objective: &str) -> Result<TaskPlan> {
        let lower = objective.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();
        let has_any = |set: &[&str]| words.iter().any(|w| set.contains(w));

        let mut steps = Vec::new();
        if has_any(SCAN_WORDS) {
            steps.push(TaskStep::local("scan_directory").with_param("path", self.scan_path.clone()));
        }
        if has_any(REPORT_WORDS) {
            steps.push(TaskStep::local("generate_report").with_param("format", "pdf"));
        }
        if has_any(POST_WORDS) {
            let target = if words.contains(&"email") { "email" } else { "slack" };
            steps.push(TaskStep::external("post_summary").with_param("target", target));
        }
        if steps.is_empty() {
            steps.push(TaskStep::local("summarise_text").with_param("text", objective));
        }

        let constraints = TaskConstraints {
            no_delete: true,
            require_user_confirmation: true,
            ..TaskConstraints::default()
        };
        Ok(TaskPlan::new(steps, constraints)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskbridge_protocol::StepKind;

    fn actions(plan: &TaskPlan) -> Vec<&str> {
        plan.steps().iter().map(|s| s.action.as_str()).collect()
    }

    #[test]
    fn weekly_report_pipeline() {
        let plan = KeywordPlanner::new("/srv/code")
            .plan("Scan my repos and post the weekly report to Slack")
            .unwrap();
        assert_eq!(
            actions(&plan),
            vec!["scan_directory", "generate_report", "post_summary"]
        );
        assert_eq!(plan.steps()[0].params["path"], json!("/srv/code"));
        assert_eq!(plan.steps()[2].kind, StepKind::External);
        assert_eq!(plan.steps()[2].params["target"], json!("slack"));
        assert!(plan.constraints().no_delete);
        assert!(plan.constraints().require_user_confirmation);
    }

    #[test]
    fn email_target() {
        let plan = KeywordPlanner::default().plan("email me a digest").unwrap();
        assert_eq!(actions(&plan), vec!["generate_report", "post_summary"]);
        assert_eq!(plan.steps()[1].params["target"], json!("email"));
    }

    #[test]
    fn keywords_match_whole_words() {
        // "projection" is not "project", "reporter" is not "report".
        let plan = KeywordPlanner::default()
            .plan("hello reporter, any projection?")
            .unwrap();
        assert_eq!(actions(&plan), vec!["summarise_text"]);
        assert_eq!(
            plan.steps()[0].params["text"],
            json!("hello reporter, any projection?")
        );
    }

    #[test]
    fn plans_get_fresh_ids() {
        let planner = KeywordPlanner::default();
        let a = planner.plan("scan").unwrap();
        let b = planner.plan("scan").unwrap();
        assert_ne!(a.task_id(), b.task_id());
    }
}
