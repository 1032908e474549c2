//! Shell-script workers for tests.

use std::collections::HashMap;
use std::path::Path;

use tokio::process::Command;

use crate::worker::WorkerSpawner;

/// Replies `<type>_ok` to every request: swaps src/dest and turns `msg_id`
/// into `in_reply_to`. Request fields are echoed back, so `echo` round-trips.
pub(crate) const REPLY_OK_SCRIPT: &str = r#"while IFS= read -r line; do printf '%s\n' "$line" | sed -e 's/"src":"\([^"]*\)","dest":"\([^"]*\)"/"src":"\2","dest":"\1"/' -e 's/"type":"\([a-z]*\)"/"type":"\1_ok"/' -e 's/"msg_id":/"in_reply_to":/'; done"#;

/// Answers every request with `body` fields of the caller's choosing,
/// correlated to the request's msg_id. `fields` must not contain `'` or `%`.
pub(crate) fn reply_with_body(fields: &str) -> String {
    format!(
        r#"while IFS= read -r line; do id=$(printf '%s\n' "$line" | sed -n 's/.*"msg_id":\([0-9]*\).*/\1/p'); printf '{{"src":"n2","dest":"n1","body":{{{fields},"in_reply_to":%s}}}}\n' "$id"; done"#
    )
}

/// Script that appends everything written to the worker's stdin to `path`.
pub(crate) fn capture_to(path: &Path) -> String {
    format!("cat > '{}'", path.display())
}

/// Maps binary names to `sh -c` scripts. Unknown names resolve to a path
/// that does not exist, so spawning them fails like a missing binary.
#[derive(Debug, Default)]
pub(crate) struct ScriptSpawner {
    scripts: HashMap<String, String>,
}

impl ScriptSpawner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, binary_name: &str, script: impl Into<String>) -> Self {
        self.scripts.insert(binary_name.to_string(), script.into());
        self
    }
}

impl WorkerSpawner for ScriptSpawner {
    fn command(&self, binary_name: &str) -> Command {
        match self.scripts.get(binary_name) {
            Some(script) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
            None => Command::new(format!("/nonexistent/nodelet-test/{binary_name}")),
        }
    }
}
