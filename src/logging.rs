use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use indicatif::ProgressBar;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable selecting the log level.
pub const LOG_LEVEL_ENV: &str = "GCECTL_LOG_LEVEL";

/// `DEBUG`, `INFO`, `WARN` or `ERROR` (case-insensitive); anything else is INFO.
/// `verbose` always wins.
pub fn level_from(value: Option<&str>, verbose: bool) -> LevelFilter {
    if verbose {
        return LevelFilter::DEBUG;
    }
    match value.map(|v| v.trim().to_ascii_uppercase()).as_deref() {
        Some("DEBUG") => LevelFilter::DEBUG,
        Some("WARN") | Some("WARNING") => LevelFilter::WARN,
        Some("ERROR") => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

// ── SuspendingWriter ─────────────────────────────────────

/// A `MakeWriter` for stderr that hides the active progress bar while a log
/// line is written, so the two never interleave on one terminal line.
#[derive(Clone)]
pub struct SuspendingWriter {
    active: Arc<Mutex<Option<ProgressBar>>>,
}

/// Handle returned by [`init`]: attach the bar currently on screen.
#[derive(Clone)]
pub struct ProgressHandle {
    active: Arc<Mutex<Option<ProgressBar>>>,
}

impl SuspendingWriter {
    pub fn new() -> (Self, ProgressHandle) {
        let active = Arc::new(Mutex::new(None));
        (
            Self {
                active: active.clone(),
            },
            ProgressHandle { active },
        )
    }
}

impl ProgressHandle {
    pub fn attach(&self, bar: &ProgressBar) {
        if let Ok(mut active) = self.active.lock() {
            *active = Some(bar.clone());
        }
    }

    pub fn detach(&self) {
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
    }
}

pub struct StderrWriter {
    active: Arc<Mutex<Option<ProgressBar>>>,
}

impl Write for StderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let bar = self.active.lock().ok().and_then(|active| active.clone());
        match bar {
            Some(bar) => bar.suspend(|| io::stderr().write_all(buf))?,
            None => io::stderr().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for SuspendingWriter {
    type Writer = StderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        StderrWriter {
            active: self.active.clone(),
        }
    }
}

/// Install the global subscriber: one fmt layer on stderr, filtered to this
/// crate at the level from [`LOG_LEVEL_ENV`] (or debug with `verbose`).
pub fn init(verbose: bool) -> ProgressHandle {
    let level = level_from(std::env::var(LOG_LEVEL_ENV).ok().as_deref(), verbose);
    let (writer, handle) = SuspendingWriter::new();

    let filter = EnvFilter::new(format!("gcectl={level}"));
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(verbose)
        .with_filter(filter);

    tracing_subscriber::registry().with(layer).init();
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(level_from(Some("debug"), false), LevelFilter::DEBUG);
        assert_eq!(level_from(Some("WARN"), false), LevelFilter::WARN);
        assert_eq!(level_from(Some(" Error "), false), LevelFilter::ERROR);
        assert_eq!(level_from(Some("INFO"), false), LevelFilter::INFO);
    }

    #[test]
    fn unknown_or_missing_level_is_info() {
        assert_eq!(level_from(None, false), LevelFilter::INFO);
        assert_eq!(level_from(Some("TRACE-ALL"), false), LevelFilter::INFO);
        assert_eq!(level_from(Some(""), false), LevelFilter::INFO);
    }

    #[test]
    fn verbose_forces_debug() {
        assert_eq!(level_from(Some("ERROR"), true), LevelFilter::DEBUG);
    }

    #[test]
    fn handle_attaches_and_detaches() {
        let (writer, handle) = SuspendingWriter::new();
        let bar = ProgressBar::hidden();
        handle.attach(&bar);
        assert!(writer.active.lock().unwrap().is_some());
        handle.detach();
        assert!(writer.active.lock().unwrap().is_none());
    }
}
