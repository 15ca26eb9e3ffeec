//! Tracing setup: stdout plus a daily log file in the dump directory.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{Error, Result};

/// Install the global subscriber. Log files are named `log.<date>.log`;
/// at most `keep_days` of them are kept, all of them when it is 0.
///
/// The returned guard flushes the file writer on drop; keep it alive.
pub fn init(dump_dir: &Path, keep_days: u32) -> Result<WorkerGuard> {
    let mut builder = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("log")
        .filename_suffix("log");
    if keep_days > 0 {
        builder = builder.max_log_files(keep_days as usize);
    }
    let appender = builder
        .build(dump_dir)
        .map_err(|e| Error::Logging(e.to_string()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;
    Ok(guard)
}
