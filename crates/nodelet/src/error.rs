//! Bridge error taxonomy.

use std::io;
use std::time::Duration;

use crate::bridge::codec::CodecError;
use crate::bridge::protocol::{Operation, ParseError};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to start worker '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid worker binary name '{0}'")]
    InvalidBinaryName(String),

    #[error("no worker provisioned")]
    NotProvisioned,

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to write to worker: {0}")]
    Write(#[source] io::Error),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("expected {expected} request, got {found}")]
    UnexpectedPayload { expected: Operation, found: String },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("no reply from worker for msg_id {msg_id} within {timeout:?}")]
    ReplyTimeout { msg_id: u64, timeout: Duration },

    #[error("worker exited before replying")]
    WorkerExited,

    #[error("worker reply to msg_id {msg_id} does not fit the protocol: {reason}")]
    BadReply { msg_id: u64, reason: String },

    /// The worker answered with an `error` body.
    #[error("worker error {code}: {text}")]
    Worker { code: u32, text: String },
}

impl BridgeError {
    /// Stable snake_case name for transports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::InvalidBinaryName(_) => "invalid_binary_name",
            Self::NotProvisioned => "not_provisioned",
            Self::Encode(_) => "encode",
            Self::Write(_) => "write",
            Self::UnsupportedOperation(_) => "unsupported_operation",
            Self::UnexpectedPayload { .. } => "unexpected_payload",
            Self::Malformed(_) => "malformed",
            Self::ReplyTimeout { .. } => "reply_timeout",
            Self::WorkerExited => "worker_exited",
            Self::BadReply { .. } => "bad_reply",
            Self::Worker { .. } => "worker",
        }
    }
}

impl From<CodecError> for BridgeError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encode(e) => Self::Encode(e),
            CodecError::Io(e) => Self::Write(e),
            other => Self::Write(io::Error::new(io::ErrorKind::InvalidData, other)),
        }
    }
}

impl From<ParseError> for BridgeError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Unsupported(type_name) => Self::UnsupportedOperation(type_name),
            ParseError::Malformed(e) => Self::Malformed(e.to_string()),
        }
    }
}
