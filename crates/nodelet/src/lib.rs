//! nodelet: bridge that forwards node RPCs to a worker subprocess over NDJSON stdio.

mod error;
mod health;
mod synthesize;
mod version;

pub mod bridge;
pub mod logging;
pub mod service;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use bridge::protocol::{Body, Message, Operation, Payload};
pub use error::BridgeError;
pub use health::Health;
pub use service::{BridgeConfig, BridgeService, HealthSnapshot, ReplyMode};
pub use synthesize::{PLACEHOLDER_READ_MESSAGES, PLACEHOLDER_UNIQUE_ID, synthesize};
pub use version::{NODELET_VERSION, VersionInfo};
pub use worker::{DirectorySpawner, ShutdownGrace, WorkerInfo, WorkerProcess, WorkerSpawner};
