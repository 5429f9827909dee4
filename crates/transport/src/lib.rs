//! Transport boundary.
//!
//! Delivery is best effort and at most once. Addresses are opaque strings;
//! every inbound [`Envelope`] carries the sender's address in `from`.
//!
//! `from` is declared by the sender and is not authenticated by any
//! transport here. It is fine for routing replies and for spotting mixups,
//! but a peer can name any address it likes. Authority over what runs on a
//! device comes from the plan signature and the pairing key, never from
//! `from`.

use async_trait::async_trait;
use taskbridge_protocol::{Envelope, Message};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;
#[cfg(unix)]
pub mod unix;

pub use memory::{MemoryNetwork, MemoryTransport};
#[cfg(unix)]
pub use unix::UnixTransport;

pub const INBOX_CAPACITY: usize = 256;

/// Inbound envelopes for one address, in arrival order.
pub type Inbox = mpsc::Receiver<Envelope>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("address unreachable: {0}")]
    Unreachable(String),
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Address peers use to reach this endpoint.
    fn local_address(&self) -> &str;

    /// Fire-and-forget. An `Ok` means the envelope left this process, not
    /// that it was handled.
    async fn send(&self, to: &str, message: Message) -> Result<(), TransportError>;
}
