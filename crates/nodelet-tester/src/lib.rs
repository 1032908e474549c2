//! HTTP client and canned request sequences for exercising a nodelet bridge.

use std::collections::BTreeMap;
use std::time::Duration;

use nodelet::{Message, Operation, Payload};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Where `nodelet` listens by default.
pub const DEFAULT_ADDR: &str = "http://localhost:5051";

#[derive(Debug, thiserror::Error)]
pub enum TesterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bridge returned {status} ({kind}): {error}")]
    Bridge {
        status: u16,
        kind: String,
        error: String,
    },

    #[error("unexpected reply to {op}: got {found}")]
    UnexpectedReply { op: Operation, found: String },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    kind: String,
}

/// Thin client over the bridge's HTTP surface.
pub struct BridgeClient {
    http: reqwest::Client,
    base: String,
}

impl BridgeClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, TesterError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Provision `binary_name`; returns the bridge's worker description.
    pub async fn set_worker(&self, binary_name: &str) -> Result<serde_json::Value, TesterError> {
        let response = self
            .http
            .put(format!("{}/worker", self.base))
            .json(&serde_json::json!({ "binary_name": binary_name }))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn send(&self, op: Operation, request: &Message) -> Result<Message, TesterError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base, op))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TesterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.json::<ErrorBody>().await.unwrap_or(ErrorBody {
        error: status.canonical_reason().unwrap_or_default().to_string(),
        kind: String::new(),
    });
    Err(TesterError::Bridge {
        status: status.as_u16(),
        kind: body.kind,
        error: body.error,
    })
}

/// Which canned sequence to send. Also names the worker binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RequestKind {
    Echo,
    #[value(name = "unique_ids")]
    UniqueIds,
    Broadcast,
}

impl RequestKind {
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::UniqueIds => "unique_ids",
            Self::Broadcast => "broadcast",
        }
    }
}

fn request(payload: Payload) -> Message {
    Message::new("n1", "n2", payload)
}

/// The full request sequence for `kind`, starting with `init`.
pub fn plan(kind: RequestKind) -> Vec<(Operation, Message)> {
    let mut steps = vec![(
        Operation::Init,
        request(Payload::Init {
            node_id: "n1".to_string(),
            node_ids: vec!["n1".to_string(), "n2".to_string()],
        }),
    )];

    match kind {
        RequestKind::Echo => {
            for text in [
                "hello from grpc",
                "this is not me",
                "hello me it's me again",
            ] {
                let echo = request(Payload::Echo {
                    echo: text.to_string(),
                })
                .with_msg_id(1);
                steps.push((Operation::Echo, echo));
            }
        }
        RequestKind::UniqueIds => {
            steps.extend((0..5).map(|_| (Operation::Generate, request(Payload::Generate))));
        }
        RequestKind::Broadcast => {
            let topology = BTreeMap::from([
                ("n1".to_string(), vec!["n2".to_string(), "n3".to_string()]),
                ("n2".to_string(), vec!["n1".to_string()]),
                ("n3".to_string(), vec!["n1".to_string()]),
            ]);
            steps.push((
                Operation::Broadcast,
                request(Payload::Broadcast { message: 123 }),
            ));
            steps.push((Operation::Read, request(Payload::Read)));
            steps.push((Operation::Topology, request(Payload::Topology { topology })));
        }
    }

    steps
}

/// Provision the worker for `kind` and send its sequence, stopping at the
/// first failure.
pub async fn run(client: &BridgeClient, kind: RequestKind) -> Result<Vec<Message>, TesterError> {
    let worker = client.set_worker(kind.binary_name()).await?;
    tracing::info!(binary = kind.binary_name(), worker = %worker["worker"]["id"], "Worker set");

    let mut replies = Vec::new();
    for (op, message) in plan(kind) {
        let reply = client.send(op, &message).await?;
        let found = reply.payload().type_name();
        tracing::info!(%op, reply_type = found, "Response to {}", op);
        if found != op.reply_type() {
            return Err(TesterError::UnexpectedReply {
                op,
                found: found.to_string(),
            });
        }
        replies.push(reply);
    }
    Ok(replies)
}
