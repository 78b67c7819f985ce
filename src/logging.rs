//! tracing の初期化。コンソール出力と、任意でタイムスタンプ付きログファイル

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Keep alive for the lifetime of the program; dropping it flushes the file.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// `RUST_LOG` overrides `config.level`. Log files are named `<name>_<timestamp>.log`.
pub fn init(config: &LoggingConfig, name: &str) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level {:?}", config.level))?;

    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard, path) = match &config.directory {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let path = log_file_path(dir, name, Local::now());
            let file = fs::File::create(&path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard), Some(path))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(path) = &path {
        tracing::info!("Log: {}", path.display());
    }
    Ok(LogGuard { _file: guard })
}

fn log_file_path(dir: &Path, name: &str, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.log", name, now.format("%Y%m%d_%H%M%S")))
}
