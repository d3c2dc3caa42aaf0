//! Lightweight CSV span-duration profiler (§8), ported in spirit from the qsim crate's
//! `simulation::profiling` module: a [`tracing_subscriber::Layer`] that accumulates the busy
//! time of each span between its `enter`/`exit` calls and writes one CSV row per span on close.
//!
//! Unlike the qsim crate's version this carries no debug `println!`s and drops the unrelated
//! event-formatting half of that module -- the manager only needs span durations, not a second
//! event formatter.

use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use tracing::span::Attributes;
use tracing::{Event, Id, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Flushes the underlying CSV file when dropped. Held alongside the `WorkerGuard` returned by
/// [`crate::logging::init_logging`] for the lifetime of the process.
pub struct WriterGuard {
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

struct SpanTiming {
    entered_at: Instant,
    busy_nanos: u64,
}

impl SpanTiming {
    fn new() -> Self {
        SpanTiming { entered_at: Instant::now(), busy_nanos: 0 }
    }
}

/// Records the busy duration of every span at or above `level` and appends a CSV row
/// (`timestamp,target,span_name,busy_nanos`) to `path` when the span closes.
pub struct SpanDurationToCSVLayer {
    writer: Arc<Mutex<BufWriter<File>>>,
    level: Level,
}

impl SpanDurationToCSVLayer {
    pub fn new(path: &Path, level: Level) -> (Self, WriterGuard) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let file = File::create(path).unwrap_or_else(|e| panic!("failed to create {path:?}: {e}"));
        let mut writer = BufWriter::new(file);
        writer.write_all(b"timestamp,target,span_name,busy_nanos\n").expect("failed to write CSV header");
        let writer = Arc::new(Mutex::new(writer));
        (SpanDurationToCSVLayer { writer: writer.clone(), level }, WriterGuard { writer })
    }
}

impl<S> Layer<S> for SpanDurationToCSVLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, _attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        if *span.metadata().level() > self.level {
            return;
        }
        span.extensions_mut().insert(SpanTiming::new());
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        if let Some(timing) = extensions.get_mut::<SpanTiming>() {
            timing.entered_at = Instant::now();
        }
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        if let Some(timing) = extensions.get_mut::<SpanTiming>() {
            timing.busy_nanos += timing.entered_at.elapsed().as_nanos() as u64;
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else { return };
        let extensions = span.extensions();
        let Some(timing) = extensions.get::<SpanTiming>() else { return };
        let timestamp =
            SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
        let row = format!("{timestamp},{},{},{}\n", span.metadata().target(), span.name(), timing.busy_nanos);
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.write_all(row.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::instrument;
    use tracing_subscriber::layer::SubscriberExt;

    #[instrument(level = "trace")]
    fn traced_work() {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    #[test]
    fn span_close_appends_a_csv_row() {
        let dir = std::env::temp_dir().join(format!("vistle-profiling-test-{}", std::process::id()));
        let path = dir.join("instrument_process_0.csv");
        let (layer, _guard) = SpanDurationToCSVLayer::new(&path, Level::TRACE);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            traced_work();
        });
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.lines().count() >= 2);
        fs::remove_dir_all(&dir).ok();
    }
}
