//! Worker subprocess handle.
//!
//! Flow:
//! 1. Resolve the binary through a [`WorkerSpawner`] and spawn it with piped stdio
//! 2. Start the output capture loop on stdout (logs every line, routes replies)
//! 3. Write NDJSON records to stdin, one writer at a time
//! 4. On replacement or shutdown: close stdin, SIGTERM, SIGKILL, reap
//!
//! The handle is shared (`Arc<WorkerProcess>`). Stdin, the child and the
//! identity/liveness state sit behind separate locks, so a write blocked on a
//! full pipe never stalls health reporting or teardown.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::bridge::codec::{NdjsonCodec, OutputLine, OutputLineCodec};
use crate::bridge::protocol::Message;
use crate::error::BridgeError;

/// How long teardown waits for the capture loop to drain after the process is gone.
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Callers waiting on a worker reply, keyed by the correlation id sent as `msg_id`.
///
/// A reply that answers the id but does not decode as a [`Message`] is
/// delivered as [`BridgeError::BadReply`].
pub type PendingReplies = Arc<DashMap<u64, oneshot::Sender<Result<Message, BridgeError>>>>;

type StdinWriter = FramedWrite<ChildStdin, NdjsonCodec<Message>>;

/// Extension point for locating and launching worker executables.
pub trait WorkerSpawner: Send + Sync {
    /// Build the command for `binary_name`. Stdio wiring is applied by the caller.
    fn command(&self, binary_name: &str) -> Command;
}

/// Runs `<dir>/<binary_name>`.
#[derive(Debug, Clone)]
pub struct DirectorySpawner {
    dir: PathBuf,
}

impl DirectorySpawner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn resolve(&self, binary_name: &str) -> PathBuf {
        self.dir.join(binary_name)
    }
}

impl WorkerSpawner for DirectorySpawner {
    fn command(&self, binary_name: &str) -> Command {
        Command::new(self.resolve(binary_name))
    }
}

/// Reject names that would escape the worker directory.
pub fn validate_binary_name(binary_name: &str) -> Result<(), BridgeError> {
    let invalid = binary_name.is_empty()
        || binary_name == "."
        || binary_name == ".."
        || binary_name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(BridgeError::InvalidBinaryName(binary_name.to_string()));
    }
    Ok(())
}

/// Grace periods for the teardown escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownGrace {
    /// Wait for an in-flight write, then again for exit after closing stdin.
    pub stdin_close_grace: Duration,
    /// Wait after SIGTERM before sending SIGKILL.
    pub sigterm_grace: Duration,
}

impl Default for ShutdownGrace {
    fn default() -> Self {
        Self {
            stdin_close_grace: Duration::from_secs(5),
            sigterm_grace: Duration::from_secs(2),
        }
    }
}

/// Identity of a provisioned worker, as reported to transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    /// Distinguishes successive workers started from the same binary.
    pub id: uuid::Uuid,
    pub binary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// RFC 3339 start time.
    pub started_at: String,
}

/// A caller's registration for one correlated reply.
///
/// Dropping it (timeout, caller cancelled, write failed) removes the entry
/// from the pending table.
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Result<Message, BridgeError>>,
    table: PendingReplies,
}

impl PendingReply {
    pub fn register(table: &PendingReplies, id: u64) -> Self {
        let (tx, rx) = oneshot::channel();
        table.insert(id, tx);
        Self {
            id,
            rx,
            table: Arc::clone(table),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(mut self, timeout: Duration) -> Result<Message, BridgeError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BridgeError::WorkerExited),
            Err(_) => Err(BridgeError::ReplyTimeout {
                msg_id: self.id,
                timeout,
            }),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

/// Process state only teardown touches.
struct Lifecycle {
    child: Child,
    capture: Option<JoinHandle<()>>,
}

/// A live worker subprocess and its stdio.
pub struct WorkerProcess {
    info: WorkerInfo,
    /// Serializes stdin writes. `None` once stdin is closed.
    writer: Mutex<Option<StdinWriter>>,
    lifecycle: Mutex<Lifecycle>,
    pending: PendingReplies,
    alive: Arc<AtomicBool>,
    /// Fired by teardown to abandon a write the worker is not draining.
    stopping: CancellationToken,
}

impl WorkerProcess {
    /// Spawn `binary_name` and start capturing its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(spawner: &dyn WorkerSpawner, binary_name: &str) -> Result<Self, BridgeError> {
        validate_binary_name(binary_name)?;

        let spawn_error = |source: io::Error| BridgeError::Spawn {
            binary: binary_name.to_string(),
            source,
        };

        let mut command = spawner.command(binary_name);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stdout not captured")))?;

        let info = WorkerInfo {
            id: uuid::Uuid::new_v4(),
            binary: binary_name.to_string(),
            pid: child.id(),
            started_at: chrono::Utc::now().to_rfc3339(),
        };
        tracing::info!(binary = %info.binary, worker_id = %info.id, pid = ?info.pid, "Worker spawned");

        let pending: PendingReplies = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let capture = tokio::spawn(capture_output(
            info.clone(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));

        Ok(Self {
            info,
            writer: Mutex::new(Some(FramedWrite::new(stdin, NdjsonCodec::new()))),
            lifecycle: Mutex::new(Lifecycle {
                child,
                capture: Some(capture),
            }),
            pending,
            alive,
            stopping: CancellationToken::new(),
        })
    }

    pub fn info(&self) -> &WorkerInfo {
        &self.info
    }

    /// False once the worker's stdout has closed.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    /// Write one record and flush it.
    ///
    /// Writers queue on the stdin lock, so a record is always written whole
    /// before the next one starts. Fails with `WorkerExited` once teardown
    /// has closed stdin or abandoned the write.
    pub async fn write(&self, message: Message) -> Result<(), BridgeError> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(BridgeError::WorkerExited);
        };
        tokio::select! {
            biased;
            _ = self.stopping.cancelled() => Err(BridgeError::WorkerExited),
            result = writer.send(message) => result.map_err(BridgeError::from),
        }
    }

    /// Stop the worker: close stdin, then SIGTERM, then SIGKILL.
    ///
    /// A write still in flight gets `stdin_close_grace` to finish before it
    /// is abandoned. Returns the exit code (`-1` when killed by a signal), or
    /// `None` if the process could not be reaped.
    pub async fn terminate(&self, grace: ShutdownGrace) -> Option<i32> {
        let info = &self.info;
        tracing::info!(binary = %info.binary, worker_id = %info.id, "Stopping worker");

        let stdin_drained = self.close_stdin(grace.stdin_close_grace).await;

        let mut lifecycle = self.lifecycle.lock().await;
        let child = &mut lifecycle.child;
        let exited = if stdin_drained {
            wait_exit(child, grace.stdin_close_grace, info, "stdin close").await
        } else {
            None
        };
        let code = match exited {
            Some(code) => Some(code),
            None => {
                send_sigterm(child, info);
                match wait_exit(child, grace.sigterm_grace, info, "SIGTERM").await {
                    Some(code) => Some(code),
                    None => force_kill(child, info).await,
                }
            }
        };

        if let Some(capture) = lifecycle.capture.take() {
            let abort = capture.abort_handle();
            if tokio::time::timeout(CAPTURE_DRAIN_TIMEOUT, capture)
                .await
                .is_err()
            {
                tracing::debug!(worker_id = %info.id, "Output capture still running after exit, aborting");
                abort.abort();
            }
        }
        self.pending.clear();

        code
    }

    /// Drop the stdin writer. Returns false if an in-flight write had to be
    /// abandoned, meaning the worker stopped draining its input.
    async fn close_stdin(&self, grace: Duration) -> bool {
        let drained = match tokio::time::timeout(grace, self.writer.lock()).await {
            Ok(mut writer) => {
                writer.take();
                true
            }
            Err(_) => {
                tracing::warn!(
                    worker_id = %self.info.id,
                    ?grace,
                    "Write to worker still blocked, abandoning it"
                );
                false
            }
        };
        self.stopping.cancel();
        if !drained {
            self.writer.lock().await.take();
        }
        drained
    }
}

async fn wait_exit(
    child: &mut Child,
    grace: Duration,
    info: &WorkerInfo,
    after: &str,
) -> Option<i32> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            let code = status.code().unwrap_or(-1);
            tracing::info!(worker_id = %info.id, code, "Worker exited after {}", after);
            Some(code)
        }
        Ok(Err(e)) => {
            tracing::error!(worker_id = %info.id, error = %e, "Wait failed after {}", after);
            None
        }
        Err(_) => {
            tracing::info!(worker_id = %info.id, ?grace, "Worker still running after {}", after);
            None
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child, info: &WorkerInfo) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw_pid) = i32::try_from(pid) else {
        return;
    };
    tracing::info!(worker_id = %info.id, pid, "Sending SIGTERM to worker");
    if let Err(e) = kill(Pid::from_raw(raw_pid), Signal::SIGTERM) {
        tracing::warn!(worker_id = %info.id, pid, error = ?e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child, _info: &WorkerInfo) {}

async fn force_kill(child: &mut Child, info: &WorkerInfo) -> Option<i32> {
    tracing::warn!(worker_id = %info.id, "Sending SIGKILL to worker");
    if let Err(e) = child.kill().await {
        tracing::error!(worker_id = %info.id, error = %e, "SIGKILL failed");
    }
    match child.wait().await {
        Ok(status) => Some(status.code().unwrap_or(-1)),
        Err(e) => {
            tracing::error!(worker_id = %info.id, error = %e, "Failed to reap worker");
            None
        }
    }
}

/// Drain worker stdout for the worker's whole lifetime.
///
/// Every line is logged on target `nodelet::worker`. A JSON line whose
/// `body.in_reply_to` matches a pending correlation id is handed to that
/// caller. Read errors end the loop and are only logged: nobody is waiting
/// on them.
async fn capture_output(
    info: WorkerInfo,
    stdout: ChildStdout,
    pending: PendingReplies,
    alive: Arc<AtomicBool>,
) {
    let mut lines = FramedRead::new(stdout, OutputLineCodec::new());

    loop {
        match lines.next().await {
            Some(Ok(OutputLine::Line(line))) => route_line(&info, &line, &pending),
            Some(Ok(OutputLine::Oversized)) => {
                tracing::warn!(worker_id = %info.id, "Worker output line exceeds limit, skipped");
            }
            Some(Err(e)) => {
                tracing::error!(worker_id = %info.id, error = %e, "Error reading worker output");
                break;
            }
            None => {
                tracing::info!(worker_id = %info.id, binary = %info.binary, "Worker output closed");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);

    // Dropping the senders wakes every waiting caller with WorkerExited.
    let stranded = pending.len();
    pending.clear();
    if stranded > 0 {
        tracing::warn!(worker_id = %info.id, stranded, "Failing pending replies: worker output closed");
    }
}

fn route_line(info: &WorkerInfo, line: &str, pending: &PendingReplies) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    tracing::info!(
        target: "nodelet::worker",
        binary = %info.binary,
        worker_id = %info.id,
        "{}",
        trimmed
    );

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return;
    };
    let Some(reply_to) = value.pointer("/body/in_reply_to").and_then(|id| id.as_u64()) else {
        tracing::debug!(worker_id = %info.id, "Worker message is not a reply");
        return;
    };
    let Some((_, tx)) = pending.remove(&reply_to) else {
        tracing::debug!(worker_id = %info.id, reply_to, "No pending caller for worker reply");
        return;
    };

    let reply = serde_json::from_value::<Message>(value).map_err(|e| {
        tracing::warn!(worker_id = %info.id, reply_to, error = %e, "Worker reply does not decode");
        BridgeError::BadReply {
            msg_id: reply_to,
            reason: e.to_string(),
        }
    });
    if tx.send(reply).is_err() {
        tracing::debug!(worker_id = %info.id, reply_to, "Caller gone before reply arrived");
    }
}
