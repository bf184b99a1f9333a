//! provides logging helpers

use std::fmt::{self};
use std::path::Path;

use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::Registry;
use utils::logging::split_log_path;

pub const METRICS_TARGET: &str = "metrics";
const DEFAULT_METRICS_FILE: &str = "/logs/metrics.log";

/// Writes the `msg` field verbatim, one encoded metric line per event.
struct MetricsLineFormatter;

struct FieldVisitor {
    msg: String,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, _: &Field, value: &str) {
        self.msg.push_str(value);
    }

    fn record_debug(&mut self, _: &Field, value: &dyn fmt::Debug) {
        self.msg.push_str(&format!("{value:?}"));
    }
}

impl<S, N> FormatEvent<S, N> for MetricsLineFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor { msg: String::new() };
        event.record(&mut visitor);
        write!(writer, "{}", visitor.msg)
    }
}

/// Keeps the non-blocking writers flushing until dropped.
#[must_use]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// initiate the global tracing subscriber
pub fn init(metrics_file: Option<&Path>) -> LoggingGuards {
    let mut guards = Vec::new();
    let (fmt_layer, fmt_guard) = utils::logging::get_fmt_layer::<Registry>();
    guards.extend(fmt_guard);

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();
    let fmt_layer = fmt_layer.with_filter(env_filter.and(filter::filter_fn(|metadata| {
        metadata.target() != METRICS_TARGET
    })));

    let metrics_file = metrics_file.unwrap_or(Path::new(DEFAULT_METRICS_FILE));
    let (dir, prefix) = split_log_path(metrics_file);
    let metrics_layer = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix.to_string_lossy())
        .max_log_files(3)
        .build(&dir)
    {
        Ok(appender) => {
            let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
            guards.push(file_guard);
            Some(
                layer()
                    .event_format(MetricsLineFormatter)
                    .fmt_fields(format::DefaultFields::new())
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_filter(filter::filter_fn(|metadata| {
                        metadata.target() == METRICS_TARGET
                    })),
            )
        }
        Err(e) => {
            eprintln!(
                "metrics file {} unavailable, metrics are not persisted: {e}",
                metrics_file.display()
            );
            None
        }
    };

    registry().with(fmt_layer).with(metrics_layer).init();
    LoggingGuards { _guards: guards }
}
