//! Tracing subscriber setup.
//!
//! Records always go to `{log_dir}/xmppreceiver-{jid}.log`, appended and
//! never rotated. A stderr layer is added for `--verbose` or when `RUST_LOG`
//! is set, and also when the log file cannot be opened.

use crate::config::Verbosity;
use crate::model::Jid;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "xmpp_receiver=info,info";
const XMPP_TRAFFIC_FILTER: &str = "xmpp_receiver=info,xmpp_receiver::xmpp=debug,info";

pub fn log_file_name(jid: &Jid) -> String {
    format!("xmppreceiver-{}.log", jid.bare())
}

fn stderr_directives(verbose: Option<Verbosity>) -> &'static str {
    match verbose {
        Some(Verbosity::Xmpp) => XMPP_TRAFFIC_FILTER,
        _ => DEFAULT_FILTER,
    }
}

fn env_or(directives: &str) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(directives)
    }
}

/// Open `{log_dir}/xmppreceiver-{jid}.log` for appending behind a
/// non-blocking writer. Records queued in the writer are flushed when the
/// returned guard is dropped.
pub fn file_writer(log_dir: &Path, jid: &Jid) -> Result<(NonBlocking, WorkerGuard, PathBuf), InitError> {
    let file_name = log_file_name(jid);
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&file_name)
        .build(log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    Ok((non_blocking, guard, log_dir.join(file_name)))
}

/// Install the global subscriber.
///
/// Returns the log file path when file logging could be set up, and the
/// writer guard, which must be held until the process is about to exit.
pub fn init(
    log_dir: &Path,
    jid: &Jid,
    verbose: Option<Verbosity>,
) -> (Option<PathBuf>, Option<WorkerGuard>) {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("Warning: could not create log directory '{}': {}", log_dir.display(), e);
    }

    let (file_layer, log_file, guard) = match file_writer(log_dir, jid) {
        Ok((non_blocking, guard, path)) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_or(DEFAULT_FILTER));
            (Some(layer), Some(path), Some(guard))
        }
        Err(e) => {
            eprintln!(
                "Warning: could not open log file in '{}': {}; logging to stderr only",
                log_dir.display(),
                e
            );
            (None, None, None)
        }
    };

    let stderr_layer = if verbose.is_some() || log_file.is_none() || std::env::var("RUST_LOG").is_ok() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_or(stderr_directives(verbose))),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    (log_file, guard)
}
