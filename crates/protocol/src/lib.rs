//! Taskbridge protocol
//!
//! Shared data model for plans dispatched from an orchestrator to remote
//! connectors: plan and result shapes, the canonical encoding that gets
//! signed, the wire envelopes, and Ed25519 key handling.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod messages;
pub mod model;

pub use canonical::{canonical_bytes, canonical_from_str, decode_plan, encode_plan, peek_task_id};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ChatAcknowledgement, ChatContent, ChatMessage, Envelope, Message, ObjectiveRequest,
    ObjectiveResponse, ObjectiveStatus, PairDeviceRequest, PairDeviceResponse, PairStatus,
    TaskDispatchRequest, TaskExecutionResult,
};
pub use model::{
    DeviceRecord, ExecutionResult, Params, RejectionReason, StepKind, StepResult, StepStatus,
    TaskConstraints, TaskPlan, TaskStatus, TaskStep,
};
