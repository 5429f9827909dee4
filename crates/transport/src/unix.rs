use std::path::{Path, PathBuf};

use async_trait::async_trait;
use taskbridge_protocol::{Envelope, Message};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{Inbox, Transport, TransportError, INBOX_CAPACITY};

/// Longest envelope line accepted, newline excluded. A longer line closes
/// the connection.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Line-delimited JSON envelopes over Unix domain sockets. The address of an
/// endpoint is its socket path.
///
/// `from` is copied from the JSON the peer wrote; anything that can connect
/// to the socket can claim any address.
#[derive(Clone, Debug)]
pub struct UnixTransport {
    address: String,
}

impl UnixTransport {
    /// Binds `path` (removing a stale socket first) and starts accepting
    /// connections. Envelopes from every connection land in the returned
    /// inbox.
    pub fn bind(path: impl AsRef<Path>) -> Result<(Self, Inbox), TransportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        info!("Listening on {}", path.display());

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        tokio::spawn(accept_loop(listener, path.to_path_buf(), tx));

        Ok((
            Self {
                address: path.to_string_lossy().into_owned(),
            },
            rx,
        ))
    }
}

async fn accept_loop(listener: UnixListener, path: PathBuf, tx: mpsc::Sender<Envelope>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = read_envelopes(stream, tx).await {
                        error!("Connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept failed on {}: {}", path.display(), e);
                return;
            }
        }
        if tx.is_closed() {
            debug!("Inbox for {} dropped, stopping listener", path.display());
            return;
        }
    }
}

async fn read_envelopes<R>(stream: R, tx: mpsc::Sender<Envelope>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Ok(());
        }
        if read > MAX_LINE_BYTES && !line.ends_with('\n') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("envelope line exceeds {MAX_LINE_BYTES} bytes"),
            ));
        }
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(raw) {
            Ok(envelope) => {
                if tx.send(envelope).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => warn!("Discarding malformed envelope: {}", e),
        }
    }
}

#[async_trait]
impl Transport for UnixTransport {
    fn local_address(&self) -> &str {
        &self.address
    }

    async fn send(&self, to: &str, message: Message) -> Result<(), TransportError> {
        let envelope = Envelope::new(&self.address, to, message);
        let line = serde_json::to_string(&envelope)? + "\n";
        let mut stream = UnixStream::connect(to).await.map_err(|e| {
            debug!("Connect to {} failed: {}", to, e);
            TransportError::Unreachable(to.to_string())
        })?;
        stream.write_all(line.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }
}
