use anyhow::{Context, Result, anyhow};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_subscriber::EnvFilter;

/// Where log lines go.
#[derive(Debug, Clone)]
pub enum LogTarget {
    Stdout,
    /// Appended to through a non-blocking background writer.
    File(PathBuf),
}

/// Keeps the background log writer alive; drop it last so buffered lines
/// are flushed.
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

impl LoggingGuard {
    pub fn none() -> Self {
        Self { _worker: None }
    }

    pub fn with_guard(guard: WorkerGuard) -> Self {
        Self {
            _worker: Some(guard),
        }
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides `level`.
pub fn init_logging(target: &LogTarget, level: LevelFilter) -> Result<LoggingGuard> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    match target {
        LogTarget::Stdout => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_thread_ids(true)
                .try_init()
                .map_err(|e| anyhow!(e))
                .context("Failed to install stdout subscriber")?;
            Ok(LoggingGuard::none())
        }
        LogTarget::File(file_path) => {
            if let Some(parent) = file_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {parent:?}"))?;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)
                .with_context(|| format!("Failed to open log file {file_path:?}"))?;

            let (writer, guard) = non_blocking::NonBlockingBuilder::default()
                .thread_name("wireprofile-log")
                .finish(file);

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .try_init()
                .map_err(|e| anyhow!(e))
                .context("Failed to install file subscriber")?;

            Ok(LoggingGuard::with_guard(guard))
        }
    }
}
