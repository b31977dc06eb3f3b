use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber: stderr always, plus a daily file under `log_dir` when given.
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init(log_dir: Option<&Path>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let mut dir_error = None;
    let file_layer = log_dir.and_then(|dir| match file_writer(dir) {
        Ok(writer) => Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        ),
        Err(err) => {
            dir_error = Some((dir, err));
            None
        }
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    if let Some((dir, err)) = dir_error {
        tracing::warn!(
            "file logging disabled: cannot create {}: {}",
            dir.display(),
            err
        );
    }
}

fn file_writer(dir: &Path) -> std::io::Result<NonBlocking> {
    std::fs::create_dir_all(dir)?;
    let file_appender = tracing_appender::rolling::daily(dir, "vekta-rag.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);
    Ok(non_blocking)
}
