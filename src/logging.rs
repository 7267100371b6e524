//! Structured logging via `tracing-subscriber` and `tracing-appender`.
//!
//! The long-running service logs JSON lines to a daily-rotated file and
//! plain text to stderr. One-shot subcommands log to stderr only and stay
//! quiet unless something goes wrong.
//!
//! Both honour `RUST_LOG`; without it the defaults below apply. The MQTT
//! client is noisy at `info`, so it is held at `warn` by default.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix; the appender adds `.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "pondside.log";

/// Default directives for `start`.
const SERVICE_DIRECTIVES: &str = "info,rumqttc=warn,tower_http=info";

/// Default directives for one-shot subcommands.
const CLI_DIRECTIVES: &str = "warn";

/// Keeps the background log writer alive.
///
/// Dropping it flushes buffered lines, so hold it until `main` returns.
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// Install service logging: JSON to `{logs_dir}/pondside.log.*`, text to
/// stderr.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created or a global
/// subscriber is already installed.
pub fn init_service(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter(SERVICE_DIRECTIVES))
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard { _file: guard })
}

/// Install stderr-only logging for `snapshot` and `dose`.
///
/// A second call is a no-op.
pub fn init_cli() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter(CLI_DIRECTIVES))
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        tracing::debug!("subscriber already installed");
    }
}

/// `RUST_LOG` if set and valid, else `fallback`.
fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}
