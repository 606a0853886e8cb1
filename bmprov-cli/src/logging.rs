use std::io::ErrorKind;
use std::path::Path;
use anyhow::bail;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::DEBUG;
#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

/// Log to stdout and to a daily rolling `bmprov.log` in the settings folder. The returned guard
/// must be held until the program exits, dropping it flushes the file writer.
pub async fn configure_logging(settings_folder: &Path, level: LevelFilter) -> anyhow::Result<WorkerGuard> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_thread_ids(true);

    let log_folder = settings_folder.join("log");
    if let Err(err) = tokio::fs::create_dir_all(&log_folder).await {
        match err.kind() {
            ErrorKind::PermissionDenied => {
                bail!("permission denied creating log folder {log_folder:?}, is bmprov running as root?");
            }
            ErrorKind::AlreadyExists => {}
            _ => bail!("could not create log folder {log_folder:?}: {err}"),
        }
    }

    let file_appender = tracing_appender::rolling::daily(&log_folder, "bmprov.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(level)
                .and_then(file_log),
        )
        .init();
    Ok(guard)
}
