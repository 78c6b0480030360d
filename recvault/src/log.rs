use std::io;

use anyhow::Context as _;
use camino::Utf8Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const MAX_LOG_FILES: usize = 10;
const LOG_FILE_SUFFIX: &str = "log";

/// Keep this guard alive for the whole process: dropping it flushes and
/// stops the non-blocking writers.
pub struct LoggerGuard {
    _file_guard: Option<WorkerGuard>,
    _stdio_guard: WorkerGuard,
}

pub fn init(log_file: Option<&Utf8Path>, log_filter: &str) -> anyhow::Result<LoggerGuard> {
    let env_filter = EnvFilter::try_new(log_filter).context("invalid log filtering directives")?;

    let (non_blocking_stdio, stdio_guard) = tracing_appender::non_blocking(io::stdout());
    let stdio_layer = fmt::layer().with_writer(non_blocking_stdio);

    let (file_layer, file_guard) = match log_file {
        Some(path) => {
            let folder = path.parent().context("invalid log path (parent)")?;
            let prefix = path.file_name().context("invalid log path (file_name)")?;

            let file_appender = rolling::Builder::new()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix(prefix)
                .filename_suffix(LOG_FILE_SUFFIX)
                .max_log_files(MAX_LOG_FILES)
                .build(folder)
                .context("couldn’t create file appender")?;

            let (file_non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer().with_writer(file_non_blocking).with_ansi(false);

            (Some(file_layer), Some(file_guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdio_layer)
        .with(env_filter)
        .init();

    Ok(LoggerGuard {
        _file_guard: file_guard,
        _stdio_guard: stdio_guard,
    })
}

/// Default filtering directives: everything at info, debug for our crates
/// when the debug switch is on.
pub fn default_filter(dbg: bool) -> &'static str {
    if dbg {
        "debug,hyper=info,reqwest=info"
    } else {
        "info"
    }
}
