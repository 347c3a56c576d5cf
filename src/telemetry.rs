//! Tracing subscriber setup for the `pagesmith` binary.
//!
//! `RUST_LOG` wins when set. Otherwise the default filter is
//! `pagesmith=info,tower_http=info`, or `debug` for both with `--verbose`.
//! Console output goes to stderr so `pagesmith run` can print its report
//! on stdout.

use std::path::Path;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const LOG_FILE_PREFIX: &str = "pagesmith.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "pagesmith=debug,tower_http=debug"
    } else {
        "pagesmith=info,tower_http=info"
    }
}

/// Install the global subscriber. With `log_dir`, events are also written
/// to a daily rolling file; keep the returned guard alive until exit or
/// buffered lines are lost.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(format: LogFormat, verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let console = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .ok();

    guard
}
