//! nodelet server: HTTP front for a single worker subprocess.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use nodelet::transport::{ServerConfig, serve};
use nodelet::{BridgeConfig, BridgeService, ReplyMode};

#[derive(Parser, Debug)]
#[command(name = "nodelet")]
#[command(about = "Forward node RPCs to a worker subprocess over NDJSON stdio", version)]
struct Cli {
    /// Host to bind to
    #[arg(long, env = "NODELET_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "NODELET_PORT", default_value_t = 5051)]
    port: u16,

    /// Directory worker binaries are resolved in
    #[arg(long, env = "NODELET_WORKER_DIR", default_value = "target/debug")]
    worker_dir: PathBuf,

    /// Worker binary to provision at startup
    #[arg(long, env = "NODELET_WORKER")]
    worker: Option<String>,

    /// correlated: wait for the worker's reply; synthesized: fabricate it
    #[arg(long, env = "NODELET_REPLY_MODE", default_value_t = ReplyMode::Correlated)]
    reply_mode: ReplyMode,

    /// How long to wait for a correlated reply
    #[arg(long, env = "NODELET_REPLY_TIMEOUT_MS", default_value_t = 10_000)]
    reply_timeout_ms: u64,

    /// Ignore SIGTERM; stop only on SIGINT or POST /shutdown
    #[arg(long, env = "NODELET_AWAIT_EXPLICIT_SHUTDOWN")]
    await_explicit_shutdown: bool,
}

impl Cli {
    fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new(self.worker_dir.clone())
            .with_reply_mode(self.reply_mode)
            .with_reply_timeout(Duration::from_millis(self.reply_timeout_ms))
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            await_explicit_shutdown: self.await_explicit_shutdown,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    nodelet::logging::init_tracing();

    info!(
        version = nodelet::NODELET_VERSION,
        worker_dir = %cli.worker_dir.display(),
        reply_mode = %cli.reply_mode,
        "nodelet starting"
    );

    let service = Arc::new(BridgeService::new(cli.bridge_config()));

    if let Some(binary_name) = &cli.worker {
        let worker = service
            .set_worker(binary_name)
            .await
            .with_context(|| format!("failed to provision worker '{binary_name}'"))?;
        info!(binary = %worker.binary, worker_id = %worker.id, "Worker provisioned at startup");
    }

    serve(cli.server_config(), service).await
}
