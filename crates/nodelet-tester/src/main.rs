//! nodelet-tester: send a canned request sequence to a running bridge.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use nodelet_tester::{BridgeClient, DEFAULT_ADDR, RequestKind, run};

#[derive(Parser, Debug)]
#[command(name = "nodelet-tester")]
#[command(about = "Send a canned request sequence to a nodelet bridge", version)]
struct Cli {
    /// Sequence to send; also the worker binary to provision
    #[arg(long, value_enum)]
    request: RequestKind,

    /// Bridge base URL
    #[arg(long, env = "NODELET_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    nodelet::logging::init_tracing();

    let client = BridgeClient::new(&cli.addr, Duration::from_secs(cli.timeout_secs))
        .context("failed to build HTTP client")?;
    let replies = run(&client, cli.request)
        .await
        .with_context(|| format!("{} sequence failed", cli.request.binary_name()))?;

    tracing::info!(
        request = cli.request.binary_name(),
        replies = replies.len(),
        "Sequence complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_names_match_worker_binaries() {
        let cli = Cli::try_parse_from(["nodelet-tester", "--request", "unique_ids"]).unwrap();
        assert_eq!(cli.request, RequestKind::UniqueIds);
        assert_eq!(cli.addr, DEFAULT_ADDR);

        assert!(Cli::try_parse_from(["nodelet-tester", "--request", "cas"]).is_err());
        assert!(Cli::try_parse_from(["nodelet-tester"]).is_err());
    }
}
