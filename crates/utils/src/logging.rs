//! provides logging helpers

use std::path::Path;
use std::path::PathBuf;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::DefaultFields;
use tracing_subscriber::fmt::format::Format;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::registry::LookupSpan;

/// When set, human readable logs go to this file (rotated daily) instead of stderr.
pub const LOG_PATH_ENV_VAR: &str = "FLEET_LOG_PATH";

pub type FmtLayer<S> = Layer<S, DefaultFields, Format, BoxMakeWriter>;

/// Build the human readable fmt layer. The guard, if any, must outlive the
/// subscriber or buffered lines are lost.
pub fn get_fmt_layer<S>() -> (FmtLayer<S>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match std::env::var_os(LOG_PATH_ENV_VAR) {
        Some(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            let (dir, prefix) = split_log_path(&path);
            let appender = tracing_appender::rolling::daily(dir, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let fmt_layer = layer()
                .with_writer(BoxMakeWriter::new(writer))
                .with_ansi(false)
                .with_target(true);
            (fmt_layer, Some(guard))
        }
        _ => {
            let fmt_layer = layer()
                .with_writer(BoxMakeWriter::new(std::io::stderr))
                .with_target(true);
            (fmt_layer, None)
        }
    }
}

/// Split a log file path into the appender directory and file prefix.
pub fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let prefix = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("fleet-controller.log"));
    (dir, prefix)
}
