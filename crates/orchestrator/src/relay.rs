//! Rendering of results for the requester's channel.

use std::fmt::Write as _;

use serde_json::Value;
use taskbridge_protocol::{
    ObjectiveResponse, ObjectiveStatus, RejectionReason, TaskExecutionResult, TaskStatus,
};

const MAX_VALUE_CHARS: usize = 300;
const REPORT_ACTIONS: [&str; 2] = ["generate_report", "generate_health_report"];

/// Free-text reply for a chat-originated task.
pub fn render_chat_reply(result: &TaskExecutionResult) -> String {
    if result.status == TaskStatus::Rejected {
        let reason = result.reason.unwrap_or(RejectionReason::Unknown);
        return format!("Task `{}` was rejected.\nReason: {}", result.task_id, reason);
    }

    for action in REPORT_ACTIONS {
        let report = result
            .outputs
            .get(action)
            .and_then(|out| out.get("report_text"))
            .and_then(Value::as_str);
        if let Some(text) = report.filter(|t| !t.trim().is_empty()) {
            return text.to_string();
        }
    }

    let mut reply = format!("Task `{}` completed ({}).", result.task_id, result.status);
    for (action, output) in &result.outputs {
        let _ = write!(reply, "\n\n**{action}**");
        match output {
            Value::Object(fields) => {
                for (key, value) in fields {
                    let _ = write!(reply, "\n- {key}: {}", render_value(value));
                }
            }
            other => {
                let _ = write!(reply, "\n- {}", render_value(other));
            }
        }
    }
    for step in result.step_results().iter().filter(|s| !s.is_completed()) {
        let _ = write!(
            reply,
            "\n- {} failed: {}",
            step.action,
            step.error.as_deref().unwrap_or("unknown error")
        );
    }
    reply
}

/// Structured reply for a direct requester.
pub fn direct_reply(user_id: &str, result: &TaskExecutionResult) -> ObjectiveResponse {
    ObjectiveResponse {
        user_id: user_id.to_string(),
        task_id: result.task_id.clone(),
        status: ObjectiveStatus::from(result.status),
        outputs: result.outputs.clone(),
        reason: result.reason,
        message: format!("Task {} finished with status: {}", result.task_id, result.status),
    }
}

fn render_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(&text, MAX_VALUE_CHARS)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
