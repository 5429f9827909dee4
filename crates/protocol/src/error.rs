use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload bytes could not be decoded into the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("task plan must contain at least one step")]
    EmptyPlan,

    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProtocolError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
