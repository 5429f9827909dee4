//! Taskbridge orchestrator
//!
//! Accepts objectives from direct requesters and from chat, turns them into
//! plans, checks them against the planning policy and sends them signed to a
//! paired connector. Results coming back are matched to the pending request
//! by task id and relayed in the shape the requester expects.

pub mod chat;
pub mod correlation;
pub mod planner;
pub mod registry;
pub mod relay;
pub mod service;

pub use chat::{ChatConfig, ChatGuard, ChatGuardConfig, Suppression};
pub use correlation::{ChatOrigin, Claim, CorrelationTable, Correlations, DirectOrigin, Pending};
pub use planner::{KeywordPlanner, Planner};
pub use registry::{PairedDevice, PairingRegistry, DEFAULT_CAPABILITY};
pub use relay::{direct_reply, render_chat_reply};
pub use service::{Orchestrator, OrchestratorConfig};
