//! Orchestrator message handling: pairing, objective intake, signed
//! dispatch and result relay.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use taskbridge_executor::Executor;
use taskbridge_policy::{PlanningPolicy, PlanningPolicyConfig};
use taskbridge_protocol::crypto::{public_key_hex, sign};
use taskbridge_protocol::{
    encode_plan, ChatAcknowledgement, ChatMessage, Envelope, Message, ObjectiveRequest,
    ObjectiveResponse, ObjectiveStatus, PairDeviceRequest, PairDeviceResponse, PairStatus,
    ProtocolResult, RejectionReason, TaskDispatchRequest, TaskExecutionResult, TaskPlan,
};
use taskbridge_transport::{Inbox, Transport, TransportError};
use tracing::{debug, error, info, warn};

use crate::chat::{ChatConfig, ChatGuard};
use crate::correlation::{ChatOrigin, Claim, Correlations, DirectOrigin, Pending};
use crate::planner::{KeywordPlanner, Planner};
use crate::registry::{PairedDevice, PairingRegistry};
use crate::relay::{direct_reply, render_chat_reply};

const NO_DEVICE_MESSAGE: &str = "No paired device found. Please pair a device first.";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub planning: PlanningPolicyConfig,
    pub chat: ChatConfig,
}

/// Long-lived orchestrator state. Built once at startup and shared by
/// reference with every handler.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    signing_key: Option<SigningKey>,
    registry: PairingRegistry,
    policy: PlanningPolicy,
    guard: ChatGuard,
    chat: ChatConfig,
    planner: Box<dyn Planner>,
    local_executor: Option<Executor>,
    correlations: Mutex<Correlations>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        signing_key: Option<SigningKey>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let guard = ChatGuard::new(config.chat.guard.clone()).context("invalid chat patterns")?;
        if signing_key.is_none() {
            warn!("No signing key configured; dispatched plans will be unsigned");
        }
        Ok(Self {
            transport,
            signing_key,
            registry: PairingRegistry::new(),
            policy: PlanningPolicy::new(config.planning),
            guard,
            chat: config.chat,
            planner: Box::new(KeywordPlanner::default()),
            local_executor: None,
            correlations: Mutex::new(Correlations::default()),
        })
    }

    pub fn with_planner(mut self, planner: impl Planner + 'static) -> Self {
        self.planner = Box::new(planner);
        self
    }

    /// Executor used for chat objectives when no device can take them and
    /// `chat.local_fallback` is on.
    pub fn with_local_executor(mut self, executor: Executor) -> Self {
        self.local_executor = Some(executor);
        self
    }

    pub fn address(&self) -> &str {
        self.transport.local_address()
    }

    pub fn public_key_hex(&self) -> Option<String> {
        self.signing_key.as_ref().map(public_key_hex)
    }

    pub fn registry(&self) -> &PairingRegistry {
        &self.registry
    }

    pub fn pending_direct(&self) -> usize {
        self.correlations().direct.len()
    }

    pub fn pending_chat(&self) -> usize {
        self.correlations().chat.len()
    }

    /// Handles envelopes one at a time until the inbox closes.
    pub async fn run(self: Arc<Self>, mut inbox: Inbox) {
        info!(address = %self.address(), "Orchestrator running");
        while let Some(envelope) = inbox.recv().await {
            let kind = envelope.body.kind();
            let from = envelope.from.clone();
            if let Err(e) = self.handle(envelope).await {
                error!(%from, msg_type = kind, "Handler failed: {:#}", e);
            }
        }
        info!("Orchestrator inbox closed");
    }

    pub async fn handle(&self, envelope: Envelope) -> Result<()> {
        debug!("Received message: {} from {}", envelope.body.kind(), envelope.from);
        let from = envelope.from;
        match envelope.body {
            Message::PairDevice(req) => self.handle_pair(&from, req).await,
            Message::Objective(req) => self.handle_objective(&from, req).await,
            Message::TaskResult(result) => self.handle_result(&from, result).await,
            Message::Chat(msg) => self.handle_chat(&from, msg).await,
            other => {
                warn!(%from, "Unexpected message type: {}", other.kind());
                Ok(())
            }
        }
    }

    async fn handle_pair(&self, from: &str, req: PairDeviceRequest) -> Result<()> {
        let response = match self.registry.pair(
            &req.user_id,
            &req.device_id,
            &req.public_key_hex,
            &req.capabilities,
            from,
        ) {
            Ok(record) => {
                info!(
                    user = %record.user_id,
                    device = %record.device_id,
                    address = %from,
                    "Device paired"
                );
                PairDeviceResponse {
                    status: PairStatus::Paired,
                    message: format!("Device {} paired for {}", record.device_id, record.user_id),
                }
            }
            Err(e) => {
                warn!(user = %req.user_id, device = %req.device_id, "Pairing rejected: {}", e);
                PairDeviceResponse {
                    status: PairStatus::Rejected,
                    message: e.to_string(),
                }
            }
        };
        self.send_or_log(from, Message::PairDeviceAck(response)).await;
        Ok(())
    }

    async fn handle_objective(&self, from: &str, req: ObjectiveRequest) -> Result<()> {
        info!(user = %req.user_id, "Objective received");
        let reject = |task_id: &str, reason: RejectionReason, message: String| ObjectiveResponse {
            user_id: req.user_id.clone(),
            task_id: task_id.to_string(),
            status: ObjectiveStatus::Rejected,
            outputs: Default::default(),
            reason: Some(reason),
            message,
        };

        let plan = match self.planner.plan(&req.objective) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(user = %req.user_id, "Planning failed: {:#}", e);
                let reply = reject("", RejectionReason::Unknown, format!("Planning failed: {e:#}"));
                self.send_or_log(from, Message::ObjectiveReply(reply)).await;
                return Ok(());
            }
        };

        if let Some(reason) = self.policy.validate(Some(&req.user_id), &plan) {
            warn!(user = %req.user_id, task_id = %plan.task_id(), %reason, "Plan refused by policy");
            let reply = reject(plan.task_id(), reason, format!("Policy check failed: {reason}"));
            self.send_or_log(from, Message::ObjectiveReply(reply)).await;
            return Ok(());
        }

        let Some(device) = self.first_device(&req.user_id) else {
            warn!(user = %req.user_id, task_id = %plan.task_id(), "No paired device");
            let reply = reject(
                plan.task_id(),
                RejectionReason::DeviceNotPaired,
                NO_DEVICE_MESSAGE.to_string(),
            );
            self.send_or_log(from, Message::ObjectiveReply(reply)).await;
            return Ok(());
        };

        let request = match self.signed_request(&plan, &device) {
            Ok(request) => request,
            Err(e) => {
                error!(task_id = %plan.task_id(), "Failed to encode plan: {}", e);
                let reply = reject(plan.task_id(), RejectionReason::Unknown, e.to_string());
                self.send_or_log(from, Message::ObjectiveReply(reply)).await;
                return Ok(());
            }
        };

        let task_id = plan.task_id().to_string();
        self.correlations().direct.insert(
            task_id.as_str(),
            Pending::new(
                from,
                device.address.as_str(),
                DirectOrigin {
                    user_id: req.user_id.clone(),
                },
            ),
        );
        if let Err(e) = self.dispatch(&task_id, &device, request).await {
            self.correlations().direct.remove(&task_id);
            let reply = ObjectiveResponse {
                user_id: req.user_id.clone(),
                task_id: task_id.clone(),
                status: ObjectiveStatus::Unreachable,
                outputs: Default::default(),
                reason: Some(RejectionReason::Unknown),
                message: format!("Could not reach device {}: {}", device.record.device_id, e),
            };
            self.send_or_log(from, Message::ObjectiveReply(reply)).await;
        }
        Ok(())
    }

    async fn handle_result(&self, from: &str, result: TaskExecutionResult) -> Result<()> {
        let task_id = result.task_id.clone();
        info!(%task_id, status = %result.status, %from, "Task result received");

        let ack = ObjectiveResponse {
            user_id: "system".to_string(),
            task_id: task_id.clone(),
            status: result.status.into(),
            outputs: Default::default(),
            reason: result.reason,
            message: format!("Task {task_id} result acknowledged."),
        };
        self.send_or_log(from, Message::ObjectiveReply(ack)).await;

        let chat_claim = self.correlations().chat.claim(&task_id, from);
        match chat_claim {
            Claim::Resolved(pending) => {
                debug!(%task_id, "Relaying to chat requester {}", pending.requester);
                let reply = ChatMessage::text(render_chat_reply(&result));
                self.send_or_log(&pending.requester, Message::Chat(reply)).await;
                return Ok(());
            }
            Claim::WrongSender { expected } => {
                warn!(%task_id, %from, %expected, "Result from unexpected sender ignored");
                return Ok(());
            }
            Claim::Missing => {}
        }

        let direct_claim = self.correlations().direct.claim(&task_id, from);
        match direct_claim {
            Claim::Resolved(pending) => {
                let reply = direct_reply(&pending.origin.user_id, &result);
                self.send_or_log(&pending.requester, Message::ObjectiveReply(reply))
                    .await;
            }
            Claim::WrongSender { expected } => {
                warn!(%task_id, %from, %expected, "Result from unexpected sender ignored");
            }
            Claim::Missing => {
                warn!(%task_id, %from, "Result for unknown or already resolved task");
            }
        }
        Ok(())
    }

    async fn handle_chat(&self, from: &str, msg: ChatMessage) -> Result<()> {
        self.send_or_log(from, Message::ChatAck(ChatAcknowledgement::for_message(&msg)))
            .await;

        let Some(text) = msg.joined_text() else {
            debug!(%from, "Chat message without text");
            return Ok(());
        };

        let text = match self.guard.admit(from, &text) {
            Ok(text) => text,
            Err(cause) => {
                warn!(sender = %from, %cause, "Chat message suppressed");
                return Ok(());
            }
        };

        {
            let mut correlations = self.correlations();
            if correlations.chat.len() > self.chat.guard.max_pending {
                let dropped = correlations.chat.clear();
                warn!(dropped, "Pending chat tasks over limit; dropped all");
            }
        }

        let plan = match self.planner.plan(&text) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(sender = %from, "Planning failed: {:#}", e);
                self.chat_reply(from, format!("Planning failed: {e:#}")).await;
                return Ok(());
            }
        };

        if let Some(reason) = self.policy.validate(Some(from), &plan) {
            warn!(sender = %from, task_id = %plan.task_id(), %reason, "Plan refused by policy");
            self.chat_reply(from, format!("Policy check failed: {reason}"))
                .await;
            return Ok(());
        }
        self.guard.record_dispatch(from);

        let Some(device) = self.chat_device(from) else {
            return self.run_locally_or_decline(from, plan).await;
        };

        let request = match self.signed_request(&plan, &device) {
            Ok(request) => request,
            Err(e) => {
                error!(task_id = %plan.task_id(), "Failed to encode plan: {}", e);
                return Ok(());
            }
        };

        let task_id = plan.task_id().to_string();
        self.correlations().chat.insert(
            task_id.as_str(),
            Pending::new(
                from,
                device.address.as_str(),
                ChatOrigin {
                    original_text: text,
                },
            ),
        );
        if let Err(e) = self.dispatch(&task_id, &device, request).await {
            self.correlations().chat.remove(&task_id);
            self.chat_reply(
                from,
                format!("Could not reach device `{}`: {}", device.record.device_id, e),
            )
            .await;
        }
        Ok(())
    }

    async fn run_locally_or_decline(&self, from: &str, plan: TaskPlan) -> Result<()> {
        let executor = match (&self.local_executor, self.chat.local_fallback) {
            (Some(executor), true) => executor.clone(),
            _ => {
                warn!(sender = %from, task_id = %plan.task_id(), "No device for chat objective");
                self.chat_reply(from, NO_DEVICE_MESSAGE.to_string()).await;
                return Ok(());
            }
        };

        info!(task_id = %plan.task_id(), "No device available; executing locally");
        let result = tokio::task::spawn_blocking(move || executor.execute(&plan))
            .await
            .context("local execution task failed")?;
        let reply = render_chat_reply(&TaskExecutionResult::from_result(&result));
        self.chat_reply(from, reply).await;
        Ok(())
    }

    fn first_device(&self, user_id: &str) -> Option<PairedDevice> {
        self.registry
            .devices_for_user(user_id)
            .into_iter()
            .find_map(|r| self.registry.resolve(&r.user_id, &r.device_id))
    }

    fn chat_device(&self, sender: &str) -> Option<PairedDevice> {
        self.first_device(sender).or_else(|| {
            if !self.chat.fallback_to_any_device {
                return None;
            }
            self.registry
                .all_devices()
                .into_iter()
                .find_map(|r| self.registry.resolve(&r.user_id, &r.device_id))
        })
    }

    fn signed_request(
        &self,
        plan: &TaskPlan,
        device: &PairedDevice,
    ) -> ProtocolResult<TaskDispatchRequest> {
        let task_plan_json = encode_plan(plan)?;
        let signature_hex = self
            .signing_key
            .as_ref()
            .map(|key| sign(key, task_plan_json.as_bytes()))
            .unwrap_or_default();
        Ok(TaskDispatchRequest {
            user_id: device.record.user_id.clone(),
            device_id: device.record.device_id.clone(),
            task_plan_json,
            signature_hex,
        })
    }

    async fn dispatch(
        &self,
        task_id: &str,
        device: &PairedDevice,
        request: TaskDispatchRequest,
    ) -> Result<(), TransportError> {
        if device.address.is_empty() {
            return Err(TransportError::Unreachable(format!(
                "no address for {}/{}",
                device.record.user_id, device.record.device_id
            )));
        }
        match self
            .transport
            .send(&device.address, Message::TaskDispatch(request))
            .await
        {
            Ok(()) => {
                info!(
                    task_id = %task_id,
                    device = %device.record.device_id,
                    address = %device.address,
                    "Plan dispatched"
                );
                Ok(())
            }
            Err(e) => {
                warn!(task_id = %task_id, address = %device.address, "Dispatch failed: {}", e);
                Err(e)
            }
        }
    }

    async fn chat_reply(&self, to: &str, text: String) {
        self.send_or_log(to, Message::Chat(ChatMessage::text(text)))
            .await;
    }

    async fn send_or_log(&self, to: &str, message: Message) {
        let kind = message.kind();
        if let Err(e) = self.transport.send(to, message).await {
            warn!(%to, msg_type = kind, "Send failed: {}", e);
        }
    }

    fn correlations(&self) -> MutexGuard<'_, Correlations> {
        self.correlations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
