//! Logging setup (§8), grounded directly on the qsim crate's `simulation::logging`: a plain
//! stdout subscriber for short-lived tools, and a per-rank rolling-file subscriber for the
//! manager process proper, with rank 0 additionally echoing to the console.

use std::io;
use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

use crate::config::{resolve_path, Config, LogLevel, Profiling};
use crate::profiling::{SpanDurationToCSVLayer, WriterGuard};

/// Wires a bare stdout layer at `INFO`. Used by CLI utilities and tests that have no per-rank
/// output directory to write into.
pub fn init_std_out_logging() {
    let collector =
        tracing_subscriber::registry().with(fmt::Layer::new().with_writer(io::stdout).with_filter(LevelFilter::INFO));
    tracing::subscriber::set_global_default(collector).expect("unable to set a global collector");
}

/// Wires the manager's runtime logging: a JSON log file per rank under `config.output().log_dir`,
/// an optional CSV span-duration profile (§8), and -- rank 0 only -- a human-readable stdout
/// layer, matching "process 0 should log to console as well" from the qsim crate.
///
/// Returns the guards that must be held for the lifetime of the process to keep the non-blocking
/// writers flushing.
pub fn init_logging(config: &Config, rank: i32) -> (Option<WorkerGuard>, Option<WriterGuard>) {
    let file_discriminant = rank.to_string();
    let dir = resolve_path(config.context(), &config.output().log_dir);

    let (csv_layer, profiling_guard) = init_profiling(config, rank, &file_discriminant, &dir);
    let (log_layer, log_guard) = if config.output().logging != LogLevel::Off {
        let log_file_name = format!("log_rank_{file_discriminant}.json");
        let log_file_appender = rolling::never(&dir, log_file_name);
        let (log_file, log_guard) = non_blocking(log_file_appender);
        let level: Level = config.output().logging.into();
        let layer = fmt::Layer::new()
            .with_writer(log_file)
            .json()
            .with_ansi(false)
            .with_filter(LevelFilter::from_level(level));
        (Some(layer), Some(log_guard))
    } else {
        (None, None)
    };

    let collector = tracing_subscriber::registry()
        .with(csv_layer)
        .with(log_layer)
        .with((rank == 0).then(|| {
            fmt::layer().with_writer(io::stdout).with_span_events(FmtSpan::CLOSE).with_filter(LevelFilter::INFO)
        }));

    tracing::subscriber::set_global_default(collector).expect("unable to set a global collector");
    (log_guard, profiling_guard)
}

/// If profiling is set at all and to `TRACE`, every rank creates an instrument file; at `INFO`,
/// only rank 0 does, since a run with hundreds of ranks shouldn't pay the per-rank file cost.
fn init_profiling(
    config: &Config,
    rank: i32,
    file_discriminant: &str,
    dir: &Path,
) -> (Option<SpanDurationToCSVLayer>, Option<WriterGuard>) {
    let Profiling::Csv(level) = config.output().profiling else {
        return (None, None);
    };
    let level: Level = level.into();
    if !(level == Level::TRACE || (level == Level::INFO && rank == 0)) {
        return (None, None);
    }
    let duration_path = dir.join("instrument").join(format!("instrument_rank_{file_discriminant}.csv"));
    let (layer, guard) = SpanDurationToCSVLayer::new(&duration_path, level);
    (Some(layer), Some(guard))
}
