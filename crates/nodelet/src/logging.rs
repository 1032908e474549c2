//! Tracing setup shared by the nodelet binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn base_level(nodelet_log: Option<&str>) -> &'static str {
    match nodelet_log {
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

fn default_directives(nodelet_log: Option<&str>) -> String {
    format!(
        "nodelet={level},nodelet_tester={level}",
        level = base_level(nodelet_log)
    )
}

/// Initialize tracing with RUST_LOG, NODELET_LOG and LOG_FORMAT support.
///
/// Logs go to stderr. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let nodelet_log = std::env::var("NODELET_LOG").ok();
        EnvFilter::new(default_directives(nodelet_log.as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
