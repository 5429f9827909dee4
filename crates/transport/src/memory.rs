use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use taskbridge_protocol::{Envelope, Message};
use tokio::sync::mpsc;

use crate::{Inbox, Transport, TransportError, INBOX_CAPACITY};

/// In-process network of named endpoints.
#[derive(Clone, Default, Debug)]
pub struct MemoryNetwork {
    routes: Arc<Mutex<HashMap<String, mpsc::Sender<Envelope>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address`, replacing any earlier endpoint with that name.
    pub fn endpoint(&self, address: impl Into<String>) -> (MemoryTransport, Inbox) {
        let address = address.into();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.clone(), tx);
        (
            MemoryTransport {
                address,
                network: self.clone(),
            },
            rx,
        )
    }

    /// Drops the route so later sends to `address` fail.
    pub fn disconnect(&self, address: &str) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
    }

    fn route(&self, address: &str) -> Option<mpsc::Sender<Envelope>> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }
}

#[derive(Clone, Debug)]
pub struct MemoryTransport {
    address: String,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_address(&self) -> &str {
        &self.address
    }

    async fn send(&self, to: &str, message: Message) -> Result<(), TransportError> {
        let route = self
            .network
            .route(to)
            .ok_or_else(|| TransportError::Unreachable(to.to_string()))?;
        route
            .send(Envelope::new(&self.address, to, message))
            .await
            .map_err(|_| TransportError::Unreachable(to.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbridge_protocol::{ChatAcknowledgement, ChatMessage};

    #[tokio::test]
    async fn delivers_with_sender_address() -> anyhow::Result<()> {
        let net = MemoryNetwork::new();
        let (alice, _alice_inbox) = net.endpoint("alice");
        let (_bob, mut bob_inbox) = net.endpoint("bob");

        let ack = ChatAcknowledgement::for_message(&ChatMessage::text("hi"));
        alice.send("bob", Message::ChatAck(ack.clone())).await?;

        let env = bob_inbox.recv().await.expect("envelope");
        assert_eq!(env.from, "alice");
        assert_eq!(env.to, "bob");
        assert_eq!(env.body, Message::ChatAck(ack));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_address_is_unreachable() {
        let net = MemoryNetwork::new();
        let (alice, _inbox) = net.endpoint("alice");
        net.disconnect("alice");
        let ack = ChatAcknowledgement::for_message(&ChatMessage::text("hi"));
        let err = alice.send("alice", Message::ChatAck(ack)).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(addr) if addr == "alice"));
    }
}
