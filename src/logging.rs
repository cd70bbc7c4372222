use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result, bail};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};
use uuid::Uuid;

use crate::config::{LoggingConfig, LoggingRotation};

const LOG_FILE_PREFIX: &str = "studyquest.log";

/// Holds the background log writer; events are flushed when it drops.
pub struct TracingGuard {
    _writer: WorkerGuard,
    run_id: String,
}

impl TracingGuard {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// Installs the global subscriber described by `config`.
///
/// `config.dir` is used as given; `Config::load` has already resolved it
/// against the config file's directory.
pub fn init_tracing(config: &LoggingConfig) -> Result<TracingGuard> {
    let filter = file_filter(&config.filter)?;
    let logs = LogDirectory::new(config.dir.clone())?;
    logs.prepare()?;
    let sweep = logs.sweep(config.retention_days, SystemTime::now());

    let (writer, writer_guard) = tracing_appender::non_blocking(logs.appender(&config.rotation));
    let file_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter);
    let stderr_layer = config.stderr_warn_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(LevelFilter::WARN)
    });

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    let run_id = Uuid::now_v7().to_string();
    tracing::info!(
        target: "logging",
        run_id = %run_id,
        dir = %logs.path.display(),
        rotation = ?config.rotation,
        retention_days = config.retention_days,
        expired_files_removed = sweep.removed,
        "logging_initialized"
    );
    for warning in &sweep.warnings {
        tracing::warn!(target: "logging", warning = %warning, "log_retention_warning");
    }

    Ok(TracingGuard {
        _writer: writer_guard,
        run_id,
    })
}

fn file_filter(directives: &str) -> Result<EnvFilter> {
    if directives.trim().is_empty() {
        bail!("logging.filter cannot be empty");
    }
    EnvFilter::try_new(directives)
        .with_context(|| format!("logging.filter '{directives}' is not a valid filter"))
}

/// Outcome of a retention sweep. Failures never abort start-up.
#[derive(Debug, Default)]
struct SweepReport {
    removed: usize,
    warnings: Vec<String>,
}

/// Directory holding this crate's rolled log files.
struct LogDirectory {
    path: PathBuf,
    prefix: &'static str,
}

impl LogDirectory {
    fn new(path: PathBuf) -> Result<Self> {
        if path.as_os_str().is_empty() {
            bail!("logging.dir cannot be empty");
        }
        Ok(Self {
            path,
            prefix: LOG_FILE_PREFIX,
        })
    }

    fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create log directory {}", self.path.display()))
    }

    fn appender(&self, rotation: &LoggingRotation) -> rolling::RollingFileAppender {
        match rotation {
            LoggingRotation::Daily => rolling::daily(&self.path, self.prefix),
            LoggingRotation::Hourly => rolling::hourly(&self.path, self.prefix),
        }
    }

    /// Deletes rolled files whose last write is `retention_days` or more before `now`.
    fn sweep(&self, retention_days: usize, now: SystemTime) -> SweepReport {
        let retention = Duration::from_secs((retention_days as u64).saturating_mul(24 * 60 * 60));
        let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut report = SweepReport::default();

        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(err) => {
                report
                    .warnings
                    .push(format!("failed to scan {}: {err}", self.path.display()));
                return report;
            }
        };

        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(self.prefix) {
                continue;
            }
            let path = entry.path();
            match last_written(&path) {
                Ok(Some(modified)) if modified <= cutoff => match fs::remove_file(&path) {
                    Ok(()) => report.removed += 1,
                    Err(err) => report
                        .warnings
                        .push(format!("failed to remove {}: {err}", path.display())),
                },
                Ok(_) => {}
                Err(err) => report
                    .warnings
                    .push(format!("failed to stat {}: {err}", path.display())),
            }
        }

        report
    }
}

/// Modification time of a regular file; `None` for directories and the like.
fn last_written(path: &Path) -> std::io::Result<Option<SystemTime>> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Ok(None);
    }
    metadata.modified().map(Some)
}
