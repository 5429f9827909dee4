use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use taskbridge_connector::{Connector, ConnectorConfig};
use taskbridge_executor::{builtin_registry, Executor, WorkflowSettings};
use taskbridge_orchestrator::{ChatConfig, Orchestrator, OrchestratorConfig};
use taskbridge_policy::{ExecutionPolicy, ExecutionPolicyConfig};
use taskbridge_protocol::crypto::{generate_keypair, public_key_hex};
use taskbridge_protocol::{
    ChatMessage, Message, ObjectiveRequest, ObjectiveResponse, ObjectiveStatus, PairDeviceRequest,
    PairStatus, RejectionReason,
};
use taskbridge_transport::{Inbox, MemoryNetwork, MemoryTransport, Transport};
use tokio::time::timeout;

const ORCHESTRATOR: &str = "orchestrator";
const CONNECTOR: &str = "connector";

struct Harness {
    network: MemoryNetwork,
    orchestrator: Arc<Orchestrator>,
}

fn executor() -> Result<Executor> {
    Ok(Executor::new(builtin_registry(&WorkflowSettings::default())?))
}

fn start_orchestrator(network: &MemoryNetwork, config: OrchestratorConfig) -> Result<Harness> {
    let (transport, inbox) = network.endpoint(ORCHESTRATOR);
    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(transport), Some(generate_keypair()), config)?
            .with_local_executor(executor()?),
    );
    tokio::spawn(orchestrator.clone().run(inbox));
    Ok(Harness {
        network: network.clone(),
        orchestrator,
    })
}

async fn start_connector(harness: &Harness) -> Result<()> {
    let (transport, inbox) = harness.network.endpoint(CONNECTOR);
    let config = ConnectorConfig {
        user_id: "alice".into(),
        device_id: "laptop".into(),
        orchestrator_public_key_hex: harness.orchestrator.public_key_hex(),
        ..ConnectorConfig::default()
    };
    let connector = Arc::new(Connector::new(
        Arc::new(transport),
        &config,
        generate_keypair(),
        ExecutionPolicy::new(ExecutionPolicyConfig::default()),
        executor()?,
    )?);
    connector.pair(ORCHESTRATOR).await?;
    tokio::spawn(connector.run(inbox));

    for _ in 0..100 {
        if harness.orchestrator.registry().get("alice", "laptop").is_some() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("connector never paired")
}

async fn next(inbox: &mut Inbox) -> Result<Message> {
    let envelope = timeout(Duration::from_secs(5), inbox.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("inbox closed"))?;
    Ok(envelope.body)
}

async fn objective(client: &MemoryTransport, inbox: &mut Inbox, text: &str) -> Result<ObjectiveResponse> {
    client
        .send(
            ORCHESTRATOR,
            Message::Objective(ObjectiveRequest {
                user_id: "alice".into(),
                objective: text.into(),
                metadata: Default::default(),
            }),
        )
        .await?;
    match next(inbox).await? {
        Message::ObjectiveReply(reply) => Ok(reply),
        other => anyhow::bail!("unexpected {}", other.kind()),
    }
}

/// Sends chat text and returns the reply text, skipping the acknowledgement.
async fn chat(client: &MemoryTransport, inbox: &mut Inbox, text: &str) -> Result<Option<String>> {
    let msg = ChatMessage::text(text);
    client.send(ORCHESTRATOR, Message::Chat(msg.clone())).await?;
    match next(inbox).await? {
        Message::ChatAck(ack) => assert_eq!(ack.acknowledged_msg_id, msg.msg_id),
        other => anyhow::bail!("expected ack, got {}", other.kind()),
    }
    match timeout(Duration::from_millis(500), inbox.recv()).await {
        Err(_) => Ok(None),
        Ok(Some(envelope)) => match envelope.body {
            Message::Chat(reply) => Ok(reply.joined_text()),
            other => anyhow::bail!("unexpected {}", other.kind()),
        },
        Ok(None) => anyhow::bail!("inbox closed"),
    }
}

#[tokio::test]
async fn objective_round_trip() -> Result<()> {
    let network = MemoryNetwork::new();
    let harness = start_orchestrator(&network, OrchestratorConfig::default())?;
    start_connector(&harness).await?;
    let (client, mut inbox) = network.endpoint("client");

    let reply = objective(&client, &mut inbox, "hello world").await?;
    assert_eq!(reply.user_id, "alice");
    assert_eq!(reply.status, ObjectiveStatus::Completed);
    assert_eq!(reply.reason, None);
    assert_eq!(
        reply.outputs["summarise_text"]["summary"],
        serde_json::json!("hello world")
    );
    assert_eq!(
        reply.message,
        format!("Task {} finished with status: completed", reply.task_id)
    );
    assert_eq!(harness.orchestrator.pending_direct(), 0);
    Ok(())
}

#[tokio::test]
async fn objective_without_device_is_rejected() -> Result<()> {
    let network = MemoryNetwork::new();
    let harness = start_orchestrator(&network, OrchestratorConfig::default())?;
    let (client, mut inbox) = network.endpoint("client");

    let reply = objective(&client, &mut inbox, "hello world").await?;
    assert_eq!(reply.status, ObjectiveStatus::Rejected);
    assert_eq!(reply.reason, Some(RejectionReason::DeviceNotPaired));
    assert_eq!(reply.message, "No paired device found. Please pair a device first.");
    assert_eq!(harness.orchestrator.pending_direct(), 0);
    Ok(())
}

#[tokio::test]
async fn planning_policy_rejects_before_dispatch() -> Result<()> {
    let network = MemoryNetwork::new();
    let mut config = OrchestratorConfig::default();
    config.planning.rate_limit_per_minute = 1;
    let harness = start_orchestrator(&network, config)?;
    start_connector(&harness).await?;
    let (client, mut inbox) = network.endpoint("client");

    let first = objective(&client, &mut inbox, "hello world").await?;
    assert_eq!(first.status, ObjectiveStatus::Completed);
    let second = objective(&client, &mut inbox, "hello again").await?;
    assert_eq!(second.status, ObjectiveStatus::Rejected);
    assert_eq!(second.reason, Some(RejectionReason::QuotaExceeded));
    assert_eq!(second.message, "Policy check failed: quota_exceeded");
    Ok(())
}

#[tokio::test]
async fn vanished_device_is_unreachable() -> Result<()> {
    let network = MemoryNetwork::new();
    let harness = start_orchestrator(&network, OrchestratorConfig::default())?;
    start_connector(&harness).await?;
    network.disconnect(CONNECTOR);
    let (client, mut inbox) = network.endpoint("client");

    let reply = objective(&client, &mut inbox, "hello world").await?;
    assert_eq!(reply.status, ObjectiveStatus::Unreachable);
    assert_eq!(harness.orchestrator.pending_direct(), 0);
    Ok(())
}

#[tokio::test]
async fn malformed_pairing_is_refused() -> Result<()> {
    let network = MemoryNetwork::new();
    let harness = start_orchestrator(&network, OrchestratorConfig::default())?;
    let (device, mut inbox) = network.endpoint("device");

    device
        .send(
            ORCHESTRATOR,
            Message::PairDevice(PairDeviceRequest {
                user_id: "alice".into(),
                device_id: "laptop".into(),
                public_key_hex: "abc123".into(),
                capabilities: vec![],
            }),
        )
        .await?;
    match next(&mut inbox).await? {
        Message::PairDeviceAck(ack) => assert_eq!(ack.status, PairStatus::Rejected),
        other => anyhow::bail!("unexpected {}", other.kind()),
    }
    assert!(harness.orchestrator.registry().is_empty());

    device
        .send(
            ORCHESTRATOR,
            Message::PairDevice(PairDeviceRequest {
                user_id: "alice".into(),
                device_id: "laptop".into(),
                public_key_hex: public_key_hex(&generate_keypair()),
                capabilities: vec![],
            }),
        )
        .await?;
    match next(&mut inbox).await? {
        Message::PairDeviceAck(ack) => assert_eq!(ack.status, PairStatus::Paired),
        other => anyhow::bail!("unexpected {}", other.kind()),
    }
    assert_eq!(
        harness.orchestrator.registry().address_of("alice", "laptop").as_deref(),
        Some("device")
    );
    Ok(())
}

#[tokio::test]
async fn chat_report_is_relayed_verbatim() -> Result<()> {
    let network = MemoryNetwork::new();
    let harness = start_orchestrator(&network, OrchestratorConfig::default())?;
    start_connector(&harness).await?;
    let (user, mut inbox) = network.endpoint("chat-user");

    let reply = chat(&user, &mut inbox, "generate my weekly report").await?;
    let reply = reply.ok_or_else(|| anyhow::anyhow!("no chat reply"))?;
    assert!(reply.starts_with("# Weekly Dev Report"), "{reply}");
    assert_eq!(harness.orchestrator.pending_chat(), 0);
    Ok(())
}

#[tokio::test]
async fn chat_echoes_and_repeats_get_no_reply() -> Result<()> {
    let network = MemoryNetwork::new();
    let harness = start_orchestrator(&network, OrchestratorConfig::default())?;
    start_connector(&harness).await?;
    let (user, mut inbox) = network.endpoint("chat-user");

    assert_eq!(chat(&user, &mut inbox, "🚀🔥✨ weekly report ready").await?, None);
    assert_eq!(chat(&user, &mut inbox, "Mission accomplished!").await?, None);

    assert!(chat(&user, &mut inbox, "hello, what can you do").await?.is_some());
    // Same sender again inside the cooldown.
    assert_eq!(chat(&user, &mut inbox, "hello, anything else").await?, None);

    let (other, mut other_inbox) = network.endpoint("other-user");
    assert_eq!(
        chat(&other, &mut other_inbox, "hello, what can you do").await?,
        None
    );
    assert_eq!(harness.orchestrator.pending_chat(), 0);
    Ok(())
}

#[tokio::test]
async fn chat_runs_locally_when_enabled_and_no_device() -> Result<()> {
    let network = MemoryNetwork::new();
    let config = OrchestratorConfig {
        chat: ChatConfig {
            local_fallback: true,
            ..ChatConfig::default()
        },
        ..OrchestratorConfig::default()
    };
    let _harness = start_orchestrator(&network, config)?;
    let (user, mut inbox) = network.endpoint("chat-user");

    let reply = chat(&user, &mut inbox, "generate my weekly report").await?;
    assert!(reply.is_some_and(|r| r.starts_with("# Weekly Dev Report")));
    Ok(())
}

#[tokio::test]
async fn chat_without_device_gets_visible_reply() -> Result<()> {
    let network = MemoryNetwork::new();
    let _harness = start_orchestrator(&network, OrchestratorConfig::default())?;
    let (user, mut inbox) = network.endpoint("chat-user");

    let reply = chat(&user, &mut inbox, "generate my weekly report").await?;
    assert_eq!(
        reply.as_deref(),
        Some("No paired device found. Please pair a device first.")
    );
    Ok(())
}

#[tokio::test]
async fn pending_chats_are_dropped_only_above_the_cap() -> Result<()> {
    let network = MemoryNetwork::new();
    let mut config = OrchestratorConfig::default();
    config.chat.guard.max_pending = 2;
    let harness = start_orchestrator(&network, config)?;

    // Paired, but never answers.
    let (_device, _device_inbox) = network.endpoint("silent-device");
    harness.orchestrator.registry().pair(
        "bob",
        "desktop",
        &public_key_hex(&generate_keypair()),
        &[],
        "silent-device",
    )?;

    let mut pending = Vec::new();
    for (sender, text) in [
        ("user-a", "generate report alpha"),
        ("user-b", "generate report beta"),
        ("user-c", "generate report gamma"),
        ("user-d", "generate report delta"),
    ] {
        let (user, mut inbox) = network.endpoint(sender);
        assert_eq!(chat(&user, &mut inbox, text).await?, None);
        pending.push(harness.orchestrator.pending_chat());
    }

    assert_eq!(pending, vec![1, 2, 3, 1]);
    Ok(())
}
