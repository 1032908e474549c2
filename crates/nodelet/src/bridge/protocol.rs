//! Wire protocol types for bridge-worker communication.
//!
//! Every record is a single JSON object on its own line:
//!
//! ```json
//! {"src":"n1","dest":"n2","body":{"type":"echo","echo":"hello","msg_id":1}}
//! ```
//!
//! Requests flow bridge -> worker on stdin; replies (and anything else the
//! worker prints) flow worker -> bridge on stdout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single protocol record addressed from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: String,
    pub dest: String,
    pub body: Body,
}

impl Message {
    pub fn new(src: impl Into<String>, dest: impl Into<String>, payload: Payload) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body: Body {
                payload,
                msg_id: None,
                in_reply_to: None,
            },
        }
    }

    pub fn with_msg_id(mut self, msg_id: u64) -> Self {
        self.body.msg_id = Some(msg_id);
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: u64) -> Self {
        self.body.in_reply_to = Some(in_reply_to);
        self
    }

    pub fn payload(&self) -> &Payload {
        &self.body.payload
    }

    /// The request operation this record invokes, if it is a request at all.
    pub fn operation(&self) -> Option<Operation> {
        Operation::of(&self.body.payload)
    }

    /// Parse an untyped record.
    ///
    /// A `body.type` that names no known payload is reported as
    /// [`ParseError::Unsupported`] rather than a generic decode failure, so
    /// transports can tell "unknown operation" apart from "broken JSON".
    pub fn from_value(value: serde_json::Value) -> Result<Self, ParseError> {
        if let Some(type_name) = value.pointer("/body/type").and_then(|t| t.as_str())
            && !Payload::TYPES.contains(&type_name)
        {
            return Err(ParseError::Unsupported(type_name.to_string()));
        }
        serde_json::from_value(value).map_err(ParseError::Malformed)
    }
}

/// Message body: the tagged payload plus the correlation fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
}

/// Operation-specific body contents, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        node_id: String,
        node_ids: Vec<String>,
    },
    InitOk,

    Echo {
        echo: String,
    },
    EchoOk {
        echo: String,
    },

    Generate,
    GenerateOk {
        /// Opaque to the bridge: workers pick their own id format.
        id: serde_json::Value,
    },

    Broadcast {
        message: i64,
    },
    BroadcastOk,

    Read,
    ReadOk {
        messages: Vec<i64>,
    },

    /// Neighbor lists per node. Ordered so the encoding is deterministic.
    Topology {
        topology: BTreeMap<String, Vec<String>>,
    },
    TopologyOk,

    /// Worker-reported failure.
    Error {
        code: u32,
        #[serde(default)]
        text: String,
    },
}

impl Payload {
    /// Every `type` tag the protocol knows about.
    pub const TYPES: [&'static str; 13] = [
        "init",
        "init_ok",
        "echo",
        "echo_ok",
        "generate",
        "generate_ok",
        "broadcast",
        "broadcast_ok",
        "read",
        "read_ok",
        "topology",
        "topology_ok",
        "error",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::InitOk => "init_ok",
            Self::Echo { .. } => "echo",
            Self::EchoOk { .. } => "echo_ok",
            Self::Generate => "generate",
            Self::GenerateOk { .. } => "generate_ok",
            Self::Broadcast { .. } => "broadcast",
            Self::BroadcastOk => "broadcast_ok",
            Self::Read => "read",
            Self::ReadOk { .. } => "read_ok",
            Self::Topology { .. } => "topology",
            Self::TopologyOk => "topology_ok",
            Self::Error { .. } => "error",
        }
    }
}

/// Request operations the bridge forwards to its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Init,
    Echo,
    Generate,
    Broadcast,
    Read,
    Topology,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Self::Init,
        Self::Echo,
        Self::Generate,
        Self::Broadcast,
        Self::Read,
        Self::Topology,
    ];

    pub fn of(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Init { .. } => Some(Self::Init),
            Payload::Echo { .. } => Some(Self::Echo),
            Payload::Generate => Some(Self::Generate),
            Payload::Broadcast { .. } => Some(Self::Broadcast),
            Payload::Read => Some(Self::Read),
            Payload::Topology { .. } => Some(Self::Topology),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Echo => "echo",
            Self::Generate => "generate",
            Self::Broadcast => "broadcast",
            Self::Read => "read",
            Self::Topology => "topology",
        }
    }

    /// The `type` tag of a successful reply, e.g. `echo_ok`.
    pub fn reply_type(&self) -> &'static str {
        match self {
            Self::Init => "init_ok",
            Self::Echo => "echo_ok",
            Self::Generate => "generate_ok",
            Self::Broadcast => "broadcast_ok",
            Self::Read => "read_ok",
            Self::Topology => "topology_ok",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
}
