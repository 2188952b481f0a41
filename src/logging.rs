use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();
const MAX_LOG_FILES: usize = 7;
const DEFAULT_FILTER: &str = "info,cluster_harness=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the console + JSON file subscriber. Later calls are no-ops, so
/// every scenario may call this with its own sandbox.
pub fn init(log_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("harness")
        .filename_suffix("log")
        .build(log_dir)?;

    let mut result = Ok(());
    INIT.call_once(|| {
        // dependencies that still speak `log` end up in the same sinks
        let _ = tracing_log::LogTracer::init();

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::Layer::new()
                    .with_target(true)
                    .with_ansi(true)
                    .with_filter(env_filter()),
            )
            .with(
                fmt::Layer::new()
                    .json()
                    .with_writer(file_appender)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_ansi(false)
                    .with_filter(env_filter()),
            );

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            result = Err(e.into());
        }
    });

    cleanup_old_logs(log_dir);
    result
}

fn cleanup_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let mut log_files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "log").unwrap_or(false))
        .collect();

    // newest first
    log_files.sort_by_key(|path| {
        std::cmp::Reverse(
            fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        )
    });

    for old_file in log_files.iter().skip(MAX_LOG_FILES) {
        let _ = fs::remove_file(old_file);
    }
}
