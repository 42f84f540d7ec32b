//! Error type shared by the orchestrator, the storage backends and the
//! project layer.
//!
//! Callers branch on [`ClientError::kind`] to tell policy rejections and
//! quota exhaustion apart from opaque transport or storage failures.

use crate::wire::generation::{ClassifierParameters, RpcError, UnknownName};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("output rejected by content classifier ({} thresholds exceeded)", .0.exceeds.len())]
    ClassifierRejection(ClassifierParameters),

    #[error("out of credits: {0}")]
    OutOfCredits(String),

    #[error(transparent)]
    Transport(RpcError),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("backend '{backend}' does not support {capability}")]
    Unsupported { backend: String, capability: String },

    #[error("asset {asset_id} stored on primary but mirror '{backend}' failed: {source}")]
    PartialMirror {
        asset_id: String,
        backend: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat classification of a [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PolicyRejection,
    QuotaExhausted,
    Transport,
    Storage,
    Unsupported,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::ClassifierRejection(_) => ErrorKind::PolicyRejection,
            ClientError::OutOfCredits(_) => ErrorKind::QuotaExhausted,
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::Unsupported { .. } => ErrorKind::Unsupported,
            ClientError::PartialMirror { .. }
            | ClientError::Storage(_)
            | ClientError::Validation(_)
            | ClientError::Config(_)
            | ClientError::Io(_)
            | ClientError::Json(_) => ErrorKind::Storage,
        }
    }

    pub fn unsupported(backend: &str, capability: &str) -> Self {
        ClientError::Unsupported {
            backend: backend.to_string(),
            capability: capability.to_string(),
        }
    }
}

impl From<UnknownName> for ClientError {
    fn from(e: UnknownName) -> Self {
        ClientError::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
