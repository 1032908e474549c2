//! BridgeService: transport-agnostic front for the worker subprocess.
//!
//! This service owns:
//! - The worker slot (at most one live WorkerProcess, swapped on re-provisioning)
//! - Request forwarding (serialized stdin writes, correlated or synthesized replies)
//! - Shutdown coordination (bidirectional)
//!
//! Transports (HTTP, tester tooling) delegate to this service for every call.

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};

use crate::bridge::protocol::{Message, Operation, Payload};
use crate::error::BridgeError;
use crate::health::Health;
use crate::synthesize::synthesize;
use crate::version::VersionInfo;
use crate::worker::{
    DirectorySpawner, PendingReply, ShutdownGrace, WorkerInfo, WorkerProcess, WorkerSpawner,
    validate_binary_name,
};

/// How the bridge produces the reply to a forwarded request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// Wait for the worker's own reply, matched by correlation id.
    #[default]
    Correlated,
    /// Fabricate the reply from the request once the write succeeds.
    Synthesized,
}

impl ReplyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correlated => "correlated",
            Self::Synthesized => "synthesized",
        }
    }
}

impl std::fmt::Display for ReplyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "correlated" => Ok(Self::Correlated),
            "synthesized" => Ok(Self::Synthesized),
            other => Err(format!(
                "unknown reply mode '{other}' (expected 'correlated' or 'synthesized')"
            )),
        }
    }
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Directory worker binaries are resolved in.
    pub worker_dir: PathBuf,
    pub reply_mode: ReplyMode,
    /// Correlated mode only.
    pub reply_timeout: Duration,
    pub shutdown_grace: ShutdownGrace,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_dir: PathBuf::from("target/debug"),
            reply_mode: ReplyMode::default(),
            reply_timeout: Duration::from_secs(10),
            shutdown_grace: ShutdownGrace::default(),
        }
    }
}

impl BridgeConfig {
    pub fn new(worker_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_dir: worker_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_reply_mode(mut self, reply_mode: ReplyMode) -> Self {
        self.reply_mode = reply_mode;
        self
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: ShutdownGrace) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }
}

/// Snapshot of bridge health for transports to query.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: Health,
    pub worker: Option<WorkerInfo>,
    pub reply_mode: ReplyMode,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == Health::Ready
    }
}

/// Outcome of a submitted write.
enum Submitted {
    Written,
    Awaiting(PendingReply),
}

/// Transport-agnostic bridge service.
///
/// Created unprovisioned; `set_worker()` starts (or replaces) the worker.
pub struct BridgeService {
    /// Write-locked only to swap workers. Stdin writes serialize inside
    /// the worker, so readers never wait on a blocked pipe.
    worker: RwLock<Option<Arc<WorkerProcess>>>,
    spawner: Arc<dyn WorkerSpawner>,
    config: BridgeConfig,
    next_msg_id: AtomicU64,

    version: VersionInfo,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BridgeService {
    pub fn new(config: BridgeConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            worker: RwLock::new(None),
            spawner: Arc::new(DirectorySpawner::new(config.worker_dir.clone())),
            config,
            next_msg_id: AtomicU64::new(1),
            version: VersionInfo::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Replace how worker binaries are launched.
    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start `binary_name` as the worker, replacing any current one.
    ///
    /// The previous worker is terminated after the lock is released; on
    /// spawn failure it stays in place.
    pub async fn set_worker(&self, binary_name: &str) -> Result<WorkerInfo, BridgeError> {
        validate_binary_name(binary_name)?;

        let (info, previous) = {
            let mut slot = self.worker.write().await;
            let worker = WorkerProcess::spawn(self.spawner.as_ref(), binary_name)?;
            let info = worker.info().clone();
            (info, slot.replace(Arc::new(worker)))
        };

        if let Some(previous) = previous {
            tracing::info!(
                previous = %previous.info().binary,
                previous_id = %previous.info().id,
                next = %info.binary,
                "Replacing worker"
            );
            previous.terminate(self.config.shutdown_grace).await;
        }

        Ok(info)
    }

    pub async fn init(&self, request: Message) -> Result<Message, BridgeError> {
        self.request(Operation::Init, request).await
    }

    pub async fn echo(&self, request: Message) -> Result<Message, BridgeError> {
        self.request(Operation::Echo, request).await
    }

    pub async fn generate(&self, request: Message) -> Result<Message, BridgeError> {
        self.request(Operation::Generate, request).await
    }

    pub async fn broadcast(&self, request: Message) -> Result<Message, BridgeError> {
        self.request(Operation::Broadcast, request).await
    }

    pub async fn read(&self, request: Message) -> Result<Message, BridgeError> {
        self.request(Operation::Read, request).await
    }

    pub async fn topology(&self, request: Message) -> Result<Message, BridgeError> {
        self.request(Operation::Topology, request).await
    }

    /// Forward `request` as `op`, rejecting a payload of any other type.
    pub async fn request(&self, op: Operation, request: Message) -> Result<Message, BridgeError> {
        match request.operation() {
            Some(found) if found == op => self.forward(op, request).await,
            _ => Err(BridgeError::UnexpectedPayload {
                expected: op,
                found: request.payload().type_name().to_string(),
            }),
        }
    }

    /// Forward any request, dispatching on its payload type.
    pub async fn call(&self, request: Message) -> Result<Message, BridgeError> {
        let op = request.operation().ok_or_else(|| {
            BridgeError::UnsupportedOperation(request.payload().type_name().to_string())
        })?;
        self.forward(op, request).await
    }

    /// Parse and forward an untyped record.
    pub async fn call_value(&self, value: serde_json::Value) -> Result<Message, BridgeError> {
        let request = Message::from_value(value)?;
        self.call(request).await
    }

    async fn forward(&self, op: Operation, request: Message) -> Result<Message, BridgeError> {
        let correlation = match self.config.reply_mode {
            ReplyMode::Correlated => Some(self.next_msg_id.fetch_add(1, Ordering::Relaxed)),
            ReplyMode::Synthesized => None,
        };

        let mut outbound = request.clone();
        if let Some(id) = correlation {
            outbound.body.msg_id = Some(id);
        }
        tracing::debug!(
            %op,
            src = %request.src,
            dest = %request.dest,
            msg_id = ?request.body.msg_id,
            correlation_id = ?correlation,
            "Forwarding request to worker"
        );

        match self.submit(outbound, correlation).await? {
            Submitted::Written => Ok(synthesize(op, &request)),
            Submitted::Awaiting(pending) => {
                let reply = pending.wait(self.config.reply_timeout).await?;
                restore_ids(op, &request, reply)
            }
        }
    }

    /// Register the pending reply (if any) and write to the current worker.
    ///
    /// Runs on its own task: once started, a write completes even if the
    /// caller goes away.
    async fn submit(
        &self,
        outbound: Message,
        correlation: Option<u64>,
    ) -> Result<Submitted, BridgeError> {
        let worker = self
            .worker
            .read()
            .await
            .clone()
            .ok_or(BridgeError::NotProvisioned)?;
        let task = tokio::spawn(async move {
            if !worker.is_alive() {
                return Err(BridgeError::WorkerExited);
            }

            let pending = correlation.map(|id| PendingReply::register(worker.pending(), id));
            // Capture may have closed between the check and registration.
            if pending.is_some() && !worker.is_alive() {
                return Err(BridgeError::WorkerExited);
            }

            worker.write(outbound).await?;
            Ok::<_, BridgeError>(match pending {
                Some(pending) => Submitted::Awaiting(pending),
                None => Submitted::Written,
            })
        });

        task.await
            .map_err(|e| BridgeError::Write(io::Error::other(e)))?
    }

    pub async fn health(&self) -> HealthSnapshot {
        let slot = self.worker.read().await;
        let (state, worker) = match slot.as_deref() {
            None => (Health::Unprovisioned, None),
            Some(w) if w.is_alive() => (Health::Ready, Some(w.info().clone())),
            Some(w) => (Health::Defunct, Some(w.info().clone())),
        };
        HealthSnapshot {
            state,
            worker,
            reply_mode: self.config.reply_mode,
            version: self.version.clone(),
        }
    }

    /// Terminate the live worker, if any.
    pub async fn shutdown(&self) {
        let worker = self.worker.write().await.take();
        if let Some(worker) = worker {
            let code = worker.terminate(self.config.shutdown_grace).await;
            tracing::info!(exit_code = ?code, "Worker shut down");
        }
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

/// Turn a correlated worker reply into the caller's reply.
fn restore_ids(op: Operation, request: &Message, mut reply: Message) -> Result<Message, BridgeError> {
    if let Payload::Error { code, text } = reply.payload() {
        return Err(BridgeError::Worker {
            code: *code,
            text: text.clone(),
        });
    }
    if reply.payload().type_name() != op.reply_type() {
        tracing::warn!(
            %op,
            expected = op.reply_type(),
            found = reply.payload().type_name(),
            "Worker replied with unexpected type"
        );
    }
    reply.body.in_reply_to = request.body.msg_id;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    use crate::test_support::{REPLY_OK_SCRIPT, ScriptSpawner, capture_to, reply_with_body};

    fn quick_grace() -> ShutdownGrace {
        ShutdownGrace {
            stdin_close_grace: Duration::from_millis(500),
            sigterm_grace: Duration::from_millis(200),
        }
    }

    fn service(mode: ReplyMode, spawner: ScriptSpawner) -> BridgeService {
        let config = BridgeConfig::default()
            .with_reply_mode(mode)
            .with_reply_timeout(Duration::from_secs(5))
            .with_shutdown_grace(quick_grace());
        BridgeService::new(config).with_spawner(Arc::new(spawner))
    }

    fn echo(text: &str, msg_id: u64) -> Message {
        Message::new(
            "n1",
            "n2",
            Payload::Echo {
                echo: text.to_string(),
            },
        )
        .with_msg_id(msg_id)
    }

    fn read_records(path: &std::path::Path) -> Vec<Message> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn reply_mode_parses_case_insensitively() {
        assert_eq!("correlated".parse::<ReplyMode>(), Ok(ReplyMode::Correlated));
        assert_eq!(
            "Synthesized".parse::<ReplyMode>(),
            Ok(ReplyMode::Synthesized)
        );
        assert!("maybe".parse::<ReplyMode>().is_err());
        assert_eq!(ReplyMode::default(), ReplyMode::Correlated);
    }

    #[test]
    fn bridge_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.worker_dir, PathBuf::from("target/debug"));
        assert_eq!(config.reply_mode, ReplyMode::Correlated);
        assert_eq!(config.reply_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_grace, ShutdownGrace::default());
    }

    #[tokio::test]
    async fn synthesized_echo_reply() {
        let svc = service(
            ReplyMode::Synthesized,
            ScriptSpawner::new().with("echo", "cat > /dev/null"),
        );
        svc.set_worker("echo").await.unwrap();

        let reply = svc.echo(echo("hello", 1)).await.unwrap();

        assert_eq!(reply.src, "n2");
        assert_eq!(reply.dest, "n1");
        assert_eq!(
            reply.body.payload,
            Payload::EchoOk {
                echo: "hello".to_string()
            }
        );
        assert_eq!(reply.body.in_reply_to, Some(1));
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn synthesized_topology_reply_swaps_addresses() {
        let svc = service(
            ReplyMode::Synthesized,
            ScriptSpawner::new().with("broadcast", "cat > /dev/null"),
        );
        svc.set_worker("broadcast").await.unwrap();

        let request = Message::new(
            "n1",
            "n2",
            Payload::Topology {
                topology: BTreeMap::from([
                    ("n1".to_string(), vec!["n2".to_string(), "n3".to_string()]),
                    ("n2".to_string(), vec!["n1".to_string()]),
                ]),
            },
        )
        .with_msg_id(4);
        let reply = svc.topology(request).await.unwrap();

        assert_eq!(reply.body.payload, Payload::TopologyOk);
        assert_eq!((reply.src.as_str(), reply.dest.as_str()), ("n2", "n1"));
        assert_eq!(reply.body.in_reply_to, Some(4));
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected_before_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stdin.log");
        let svc = service(
            ReplyMode::Synthesized,
            ScriptSpawner::new().with("echo", capture_to(&out)),
        );
        svc.set_worker("echo").await.unwrap();

        let err = svc
            .call_value(serde_json::json!({
                "src": "n1",
                "dest": "n2",
                "body": {"type": "cas", "key": 1, "from": 1, "to": 2, "msg_id": 1}
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedOperation(ref t) if t == "cas"));

        let err = svc
            .call(Message::new("n1", "n2", Payload::InitOk))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedOperation(ref t) if t == "init_ok"));

        svc.shutdown().await;
        assert!(read_records(&out).is_empty());
    }

    #[tokio::test]
    async fn typed_entry_point_rejects_other_payloads() {
        let svc = service(ReplyMode::Synthesized, ScriptSpawner::new());

        let err = svc.echo(Message::new("n1", "n2", Payload::Read)).await.unwrap_err();

        assert!(matches!(
            err,
            BridgeError::UnexpectedPayload { expected: Operation::Echo, ref found } if found == "read"
        ));
    }

    #[tokio::test]
    async fn requests_before_provisioning_fail() {
        let svc = service(ReplyMode::Correlated, ScriptSpawner::new());

        let err = svc.echo(echo("hello", 1)).await.unwrap_err();

        assert!(matches!(err, BridgeError::NotProvisioned));
        assert_eq!(svc.health().await.state, Health::Unprovisioned);
    }

    #[tokio::test]
    async fn invalid_or_missing_binaries_leave_bridge_unprovisioned() {
        let svc = service(ReplyMode::Correlated, ScriptSpawner::new());

        let err = svc.set_worker("../echo").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidBinaryName(_)));

        let err = svc.set_worker("missing").await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { ref binary, .. } if binary == "missing"));

        assert_eq!(svc.health().await.state, Health::Unprovisioned);
    }

    #[tokio::test]
    async fn concurrent_writes_stay_whole() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stdin.log");
        let svc = Arc::new(service(
            ReplyMode::Synthesized,
            ScriptSpawner::new().with("echo", capture_to(&out)),
        ));
        svc.set_worker("echo").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..50u64 {
            let svc = Arc::clone(&svc);
            tasks.push(tokio::spawn(async move {
                let text = format!("{i:02}").repeat(32 * 1024);
                svc.echo(echo(&text, i)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        svc.shutdown().await;

        let records = read_records(&out);
        assert_eq!(records.len(), 50);
        let ids: BTreeSet<u64> = records.iter().filter_map(|m| m.body.msg_id).collect();
        assert_eq!(ids, (0..50).collect());
        for record in records {
            let id = record.body.msg_id.unwrap();
            assert_eq!(
                record.body.payload,
                Payload::Echo {
                    echo: format!("{id:02}").repeat(32 * 1024)
                }
            );
        }
    }

    #[tokio::test]
    async fn reprovisioning_redirects_writes_and_stops_old_worker() {
        let dir = tempfile::tempdir().unwrap();
        let first_out = dir.path().join("first.log");
        let second_out = dir.path().join("second.log");
        let svc = service(
            ReplyMode::Synthesized,
            ScriptSpawner::new()
                .with("first", capture_to(&first_out))
                .with("second", capture_to(&second_out)),
        );

        let first = svc.set_worker("first").await.unwrap();
        svc.echo(echo("one", 1)).await.unwrap();
        let second = svc.set_worker("second").await.unwrap();
        svc.echo(echo("two", 2)).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(svc.health().await.worker.unwrap().binary, "second");

        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;
            let pid = first.pid.unwrap() as i32;
            assert!(kill(Pid::from_raw(pid), None).is_err(), "old worker still running");
        }

        svc.shutdown().await;
        assert_eq!(read_records(&first_out), vec![echo("one", 1)]);
        assert_eq!(read_records(&second_out), vec![echo("two", 2)]);
    }

    #[tokio::test]
    async fn correlated_reply_restores_caller_ids() {
        let svc = service(
            ReplyMode::Correlated,
            ScriptSpawner::new().with("echo", REPLY_OK_SCRIPT),
        );
        svc.set_worker("echo").await.unwrap();

        let reply = svc.echo(echo("hello", 99)).await.unwrap();

        assert_eq!(reply.src, "n2");
        assert_eq!(reply.dest, "n1");
        assert_eq!(reply.body.in_reply_to, Some(99));
        assert_eq!(
            reply.body.payload,
            Payload::EchoOk {
                echo: "hello".to_string()
            }
        );
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_correlated_callers_get_their_own_replies() {
        let svc = Arc::new(service(
            ReplyMode::Correlated,
            ScriptSpawner::new().with("echo", REPLY_OK_SCRIPT),
        ));
        svc.set_worker("echo").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20u64 {
            let svc = Arc::clone(&svc);
            tasks.push(tokio::spawn(async move {
                // Every caller reuses msg_id 1; correlation must not rely on it.
                let reply = svc.echo(echo(&format!("caller {i}"), 1)).await.unwrap();
                (i, reply)
            }));
        }
        for task in tasks {
            let (i, reply) = task.await.unwrap();
            assert_eq!(
                reply.body.payload,
                Payload::EchoOk {
                    echo: format!("caller {i}")
                }
            );
            assert_eq!(reply.body.in_reply_to, Some(1));
        }
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn worker_error_reply_becomes_bridge_error() {
        let svc = service(
            ReplyMode::Correlated,
            ScriptSpawner::new().with(
                "echo",
                reply_with_body(r#""type":"error","code":13,"text":"crashed""#),
            ),
        );
        svc.set_worker("echo").await.unwrap();

        let err = svc.echo(echo("hello", 1)).await.unwrap_err();

        assert!(
            matches!(err, BridgeError::Worker { code: 13, ref text } if text == "crashed"),
            "got {err:?}"
        );
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn undecodable_worker_reply_fails_fast() {
        let svc = service(
            ReplyMode::Correlated,
            ScriptSpawner::new().with(
                "broadcast",
                reply_with_body(r#""type":"read_ok","messages":["x"]"#),
            ),
        );
        svc.set_worker("broadcast").await.unwrap();

        let started = std::time::Instant::now();
        let err = svc
            .read(Message::new("n1", "n2", Payload::Read).with_msg_id(4))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::BadReply { .. }), "got {err:?}");
        assert_eq!(err.kind(), "bad_reply");
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "caller waited for the reply timeout"
        );
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_tear_a_started_write() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stdin.log");
        let svc = Arc::new(service(
            ReplyMode::Correlated,
            ScriptSpawner::new().with("echo", capture_to(&out)),
        ));
        svc.set_worker("echo").await.unwrap();
        let worker = svc.worker.read().await.clone().unwrap();

        let text = "x".repeat(4 << 20);
        let caller = {
            let svc = Arc::clone(&svc);
            let text = text.clone();
            tokio::spawn(async move { svc.echo(echo(&text, 7)).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while std::fs::metadata(&out).map(|m| m.len()).unwrap_or(0) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("write never started");
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !worker.pending().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pending entry outlived its caller");
        drop(worker);
        svc.shutdown().await;

        let records = read_records(&out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].body.payload, Payload::Echo { echo: text });
    }

    #[tokio::test]
    async fn worker_not_reading_stdin_does_not_wedge_the_bridge() {
        let svc = Arc::new(service(
            ReplyMode::Synthesized,
            ScriptSpawner::new()
                .with("deaf", "exec sleep 30")
                .with("echo", "cat > /dev/null"),
        ));
        svc.set_worker("deaf").await.unwrap();

        let blocked = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.echo(echo(&"x".repeat(1 << 20), 1)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!blocked.is_finished());

        let health = tokio::time::timeout(Duration::from_secs(2), svc.health())
            .await
            .expect("health blocked behind a stalled write");
        assert!(health.is_ready());

        let next = tokio::time::timeout(Duration::from_secs(2), svc.set_worker("echo"))
            .await
            .expect("set_worker blocked behind a stalled write")
            .unwrap();
        assert_eq!(next.binary, "echo");

        let stalled = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("stalled write was not released")
            .unwrap();
        assert!(
            matches!(stalled, Err(BridgeError::WorkerExited)),
            "got {stalled:?}"
        );

        tokio::time::timeout(Duration::from_secs(2), svc.shutdown())
            .await
            .expect("shutdown hung");
        assert_eq!(svc.health().await.state, Health::Unprovisioned);
    }

    #[tokio::test]
    async fn reply_timeout_clears_pending_entry() {
        let config = BridgeConfig::default()
            .with_reply_timeout(Duration::from_millis(100))
            .with_shutdown_grace(quick_grace());
        let svc = BridgeService::new(config).with_spawner(Arc::new(
            ScriptSpawner::new().with("echo", "cat > /dev/null"),
        ));
        svc.set_worker("echo").await.unwrap();

        let err = svc.echo(echo("hello", 1)).await.unwrap_err();

        assert!(matches!(err, BridgeError::ReplyTimeout { .. }));
        {
            let slot = svc.worker.read().await;
            assert!(slot.as_ref().unwrap().pending().is_empty());
        }
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn worker_exit_fails_callers_and_marks_defunct() {
        let svc = service(
            ReplyMode::Correlated,
            ScriptSpawner::new().with("echo", "head -n 1 > /dev/null"),
        );
        svc.set_worker("echo").await.unwrap();
        assert!(svc.health().await.is_ready());

        let err = svc.echo(echo("hello", 1)).await.unwrap_err();
        assert!(
            matches!(err, BridgeError::WorkerExited | BridgeError::Write(_)),
            "got {err:?}"
        );

        let err = svc.echo(echo("again", 2)).await.unwrap_err();
        assert!(matches!(err, BridgeError::WorkerExited), "got {err:?}");
        assert_eq!(svc.health().await.state, Health::Defunct);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_leaves_bridge_unprovisioned() {
        let svc = service(
            ReplyMode::Synthesized,
            ScriptSpawner::new().with("echo", "cat > /dev/null"),
        );
        svc.set_worker("echo").await.unwrap();

        svc.shutdown().await;

        assert_eq!(svc.health().await.state, Health::Unprovisioned);
        assert!(matches!(
            svc.echo(echo("late", 1)).await,
            Err(BridgeError::NotProvisioned)
        ));
    }

    #[tokio::test]
    async fn trigger_shutdown_notifies_receivers() {
        let svc = BridgeService::new(BridgeConfig::default());
        let mut rx = svc.shutdown_rx();
        assert!(!*rx.borrow());

        svc.trigger_shutdown();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
