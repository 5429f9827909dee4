//! Wire envelopes exchanged between orchestrator, connectors and clients.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{ExecutionResult, RejectionReason, StepResult, TaskStatus};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Envelope {
    pub msg_id: String,
    /// Transport address of the sender; replies go here. Set by the sender
    /// and not authenticated.
    pub from: String,
    pub to: String,
    pub ts: u64,
    pub body: Message,
}

impl Envelope {
    pub fn new(from: impl Into<String>, to: impl Into<String>, body: Message) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            ts: now_ts(),
            body,
        }
    }
}

pub fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "msg_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    PairDevice(PairDeviceRequest),
    PairDeviceAck(PairDeviceResponse),
    Objective(ObjectiveRequest),
    ObjectiveReply(ObjectiveResponse),
    TaskDispatch(TaskDispatchRequest),
    TaskResult(TaskExecutionResult),
    Chat(ChatMessage),
    ChatAck(ChatAcknowledgement),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::PairDevice(_) => "PAIR_DEVICE",
            Message::PairDeviceAck(_) => "PAIR_DEVICE_ACK",
            Message::Objective(_) => "OBJECTIVE",
            Message::ObjectiveReply(_) => "OBJECTIVE_REPLY",
            Message::TaskDispatch(_) => "TASK_DISPATCH",
            Message::TaskResult(_) => "TASK_RESULT",
            Message::Chat(_) => "CHAT",
            Message::ChatAck(_) => "CHAT_ACK",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PairDeviceRequest {
    pub user_id: String,
    pub device_id: String,
    pub public_key_hex: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Paired,
    Rejected,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PairDeviceResponse {
    pub status: PairStatus,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskDispatchRequest {
    pub user_id: String,
    pub device_id: String,
    /// Canonical JSON of the plan, exactly as signed.
    pub task_plan_json: String,
    #[serde(default)]
    pub signature_hex: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskExecutionResult {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub step_results_json: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
}

impl TaskExecutionResult {
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            task_id: result.task_id.clone(),
            status: result.status,
            step_results_json: serde_json::to_string(&result.step_results)
                .unwrap_or_else(|_| "[]".to_string()),
            outputs: result.outputs.clone(),
            reason: result.reason,
        }
    }

    pub fn step_results(&self) -> Vec<StepResult> {
        serde_json::from_str(&self.step_results_json).unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectiveRequest {
    pub user_id: String,
    pub objective: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Completed,
    Failed,
    Partial,
    Rejected,
    Unreachable,
}

impl From<TaskStatus> for ObjectiveStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Completed => ObjectiveStatus::Completed,
            TaskStatus::Failed => ObjectiveStatus::Failed,
            TaskStatus::Partial => ObjectiveStatus::Partial,
            TaskStatus::Rejected => ObjectiveStatus::Rejected,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectiveResponse {
    pub user_id: String,
    pub task_id: String,
    pub status: ObjectiveStatus,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContent {
    StartSession,
    Text { text: String },
    EndSession,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub msg_id: String,
    pub timestamp: u64,
    pub content: Vec<ChatContent>,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            timestamp: now_ts(),
            content: vec![ChatContent::Text { text: text.into() }],
        }
    }

    /// Concatenated text parts, or `None` when the message carries no text
    /// (session markers only).
    pub fn joined_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|c| match c {
                ChatContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatAcknowledgement {
    pub acknowledged_msg_id: String,
    pub timestamp: u64,
}

impl ChatAcknowledgement {
    pub fn for_message(msg: &ChatMessage) -> Self {
        Self {
            acknowledged_msg_id: msg.msg_id.clone(),
            timestamp: now_ts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_carries_type_tag() {
        let env = Envelope::new(
            "/tmp/a.sock",
            "/tmp/b.sock",
            Message::PairDeviceAck(PairDeviceResponse {
                status: PairStatus::Paired,
                message: "ok".into(),
            }),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["body"]["msg_type"], json!("PAIR_DEVICE_ACK"));
        assert_eq!(value["body"]["payload"]["status"], json!("paired"));

        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(back.body, env.body);
    }

    #[test]
    fn chat_text_joins_only_text_parts() {
        let msg = ChatMessage {
            msg_id: "m1".into(),
            timestamp: 0,
            content: vec![
                ChatContent::StartSession,
                ChatContent::Text { text: "hello".into() },
                ChatContent::Text { text: "world".into() },
            ],
        };
        assert_eq!(msg.joined_text().as_deref(), Some("hello\nworld"));

        let start_only = ChatMessage {
            msg_id: "m2".into(),
            timestamp: 0,
            content: vec![ChatContent::StartSession],
        };
        assert_eq!(start_only.joined_text(), None);
    }

    #[test]
    fn execution_result_converts_for_the_wire() {
        let result = ExecutionResult::from_steps(
            "task_1",
            vec![StepResult::completed("summarise_text", json!({"summary": "hi"}))],
        );
        let wire = TaskExecutionResult::from_result(&result);
        assert_eq!(wire.status, TaskStatus::Completed);
        assert_eq!(wire.step_results(), result.step_results);
        assert_eq!(wire.outputs["summarise_text"]["summary"], json!("hi"));
    }
}
