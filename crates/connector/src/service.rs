//! Connector message handling.
//!
//! Each dispatch goes through ownership, signature, decode, local policy and
//! execution in that order. The first failure ends processing and a
//! rejected result is sent back instead.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use taskbridge_executor::Executor;
use taskbridge_policy::ExecutionPolicy;
use taskbridge_protocol::crypto::public_key_hex;
use taskbridge_protocol::{
    decode_plan, peek_task_id, Envelope, ExecutionResult, Message, PairDeviceRequest, PairStatus,
    RejectionReason, TaskDispatchRequest, TaskExecutionResult,
};
use taskbridge_transport::{Inbox, Transport, TransportError};
use tracing::{debug, error, info, warn};

use crate::auth::{Authenticator, Verification};

pub const DEFAULT_CONNECTOR_SOCK: &str = "/tmp/taskbridge-connector.sock";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectorConfig {
    pub socket: PathBuf,
    pub user_id: String,
    pub device_id: String,
    /// Where to send the pairing request on startup.
    pub orchestrator_address: Option<String>,
    pub orchestrator_public_key_hex: Option<String>,
    /// Accept dispatches unsigned when no orchestrator key is configured.
    pub allow_unverified_dispatch: bool,
    /// Holds the device keypair; generated on first start.
    pub key_dir: Option<PathBuf>,
    pub capabilities: Vec<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_CONNECTOR_SOCK),
            user_id: "local_user".to_string(),
            device_id: "local_device".to_string(),
            orchestrator_address: None,
            orchestrator_public_key_hex: None,
            allow_unverified_dispatch: false,
            key_dir: None,
            capabilities: vec!["weekly_report".to_string()],
        }
    }
}

pub struct Connector {
    transport: Arc<dyn Transport>,
    user_id: String,
    device_id: String,
    capabilities: Vec<String>,
    device_key: SigningKey,
    authenticator: Authenticator,
    policy: ExecutionPolicy,
    executor: Executor,
}

impl Connector {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &ConnectorConfig,
        device_key: SigningKey,
        policy: ExecutionPolicy,
        executor: Executor,
    ) -> Result<Self> {
        let authenticator = Authenticator::new(
            config.orchestrator_public_key_hex.as_deref(),
            config.allow_unverified_dispatch,
        )
        .context("invalid orchestrator public key")?;
        Ok(Self {
            transport,
            user_id: config.user_id.clone(),
            device_id: config.device_id.clone(),
            capabilities: config.capabilities.clone(),
            device_key,
            authenticator,
            policy,
            executor,
        })
    }

    pub fn address(&self) -> &str {
        self.transport.local_address()
    }

    pub fn public_key_hex(&self) -> String {
        public_key_hex(&self.device_key)
    }

    /// Sends this device's pairing request. The response arrives through the
    /// inbox like any other message.
    pub async fn pair(&self, orchestrator: &str) -> Result<(), TransportError> {
        info!(
            user = %self.user_id,
            device = %self.device_id,
            %orchestrator,
            "Requesting pairing"
        );
        let request = PairDeviceRequest {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            public_key_hex: self.public_key_hex(),
            capabilities: self.capabilities.clone(),
        };
        self.transport
            .send(orchestrator, Message::PairDevice(request))
            .await
    }

    pub async fn run(self: Arc<Self>, mut inbox: Inbox) {
        info!(address = %self.address(), device = %self.device_id, "Connector running");
        while let Some(envelope) = inbox.recv().await {
            let from = envelope.from.clone();
            if let Err(e) = self.handle(envelope).await {
                error!(%from, "Handler failed: {:#}", e);
            }
        }
        info!("Connector inbox closed");
    }

    pub async fn handle(&self, envelope: Envelope) -> Result<()> {
        let from = envelope.from;
        match envelope.body {
            Message::TaskDispatch(request) => {
                let result = self.process_dispatch(request).await;
                let message = Message::TaskResult(TaskExecutionResult::from_result(&result));
                self.transport
                    .send(&from, message)
                    .await
                    .with_context(|| format!("sending result for {}", result.task_id))?;
                Ok(())
            }
            Message::PairDeviceAck(response) => {
                match response.status {
                    PairStatus::Paired => info!(%from, "Paired: {}", response.message),
                    PairStatus::Rejected => warn!(%from, "Pairing rejected: {}", response.message),
                }
                Ok(())
            }
            Message::ObjectiveReply(reply) => {
                debug!(task_id = %reply.task_id, "{}", reply.message);
                Ok(())
            }
            other => {
                warn!(%from, "Unexpected message type: {}", other.kind());
                Ok(())
            }
        }
    }

    /// Runs one dispatch through the full pipeline. Never fails: every
    /// problem becomes a rejected or failed result.
    pub async fn process_dispatch(&self, request: TaskDispatchRequest) -> ExecutionResult {
        let claimed_id = peek_task_id(&request.task_plan_json).unwrap_or_default();

        if request.user_id != self.user_id || request.device_id != self.device_id {
            warn!(
                task_id = %claimed_id,
                user = %request.user_id,
                device = %request.device_id,
                "Dispatch addressed to another device"
            );
            return ExecutionResult::rejected(claimed_id, RejectionReason::DeviceNotPaired);
        }

        match self
            .authenticator
            .check(&request.task_plan_json, &request.signature_hex)
        {
            Ok(Verification::Verified) => {}
            Ok(Verification::Bypassed) => {
                warn!(task_id = %claimed_id, verification = "bypassed", "Running unverified plan")
            }
            Err(reason) => return ExecutionResult::rejected(claimed_id, reason),
        }

        let plan = match decode_plan(&request.task_plan_json) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(task_id = %claimed_id, "Undecodable plan: {}", e);
                return ExecutionResult::rejected(claimed_id, RejectionReason::PolicyViolation);
            }
        };

        if let Some(reason) = self.policy.validate(&plan) {
            return ExecutionResult::rejected(plan.task_id(), reason);
        }

        let task_id = plan.task_id().to_string();
        info!(%task_id, steps = plan.steps().len(), "Executing plan");
        let executor = self.executor.clone();
        match tokio::task::spawn_blocking(move || executor.execute(&plan)).await {
            Ok(result) => result,
            Err(e) => {
                error!(%task_id, "Execution task aborted: {}", e);
                ExecutionResult::rejected(task_id, RejectionReason::Unknown)
            }
        }
    }
}
