//! Per-test logger (component L1).
//!
//! Every fixture writes timestamped lines tagged with its own source id
//! (`c0`, `s1`, `b1`, ...) into one shared, captured buffer. The buffer is
//! only printed when the test fails (or always, under `-v`), so passing runs
//! stay quiet while failing ones get a full byte-level replay.

use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One captured line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Elapsed time since the logger (and therefore the test) started.
    pub elapsed: std::time::Duration,
    /// The fixture or span that produced this line (`c0`, `s1`, `tracing`, ...).
    pub source: String,
    /// The rendered line, without a trailing newline.
    pub line: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>8.3}s {:<8} {}",
            self.elapsed.as_secs_f64(),
            self.source,
            self.line
        )
    }
}

struct Inner {
    start: Instant,
    entries: Vec<LogEntry>,
    verbose: bool,
}

/// The shared per-test log buffer.
///
/// Cloning is cheap (it clones the `Arc`); every fixture holds a clone and
/// logs through it directly rather than routing through a shared mutable
/// context, so logging never contends with the executor's other locks.
#[derive(Clone)]
pub struct Logger {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl Logger {
    /// Start a new logger; `verbose` streams every line to stdout as it's produced.
    pub fn new(verbose: bool) -> Logger {
        Logger {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                start: Instant::now(),
                entries: Vec::new(),
                verbose,
            })),
        }
    }

    /// Record one line from `source`.
    pub fn log(&self, source: &str, msg: impl fmt::Display) {
        let mut inner = self.inner.lock().unwrap();
        let entry = LogEntry {
            elapsed: inner.start.elapsed(),
            source: source.to_string(),
            line: msg.to_string(),
        };
        if inner.verbose {
            println!("{}", entry);
        }
        inner.entries.push(entry);
    }

    /// Record a canonical 16-bytes-per-row hex+ASCII dump of `bytes`.
    pub fn hexdump(&self, source: &str, bytes: &[u8]) {
        for line in hexdump_lines(bytes) {
            self.log(source, line);
        }
    }

    /// Print every captured line to stdout, oldest first. Called on test
    /// failure (always) or on success (only under `-v`, where lines were
    /// already streamed live and this would be redundant).
    pub fn flush(&self) {
        let inner = self.inner.lock().unwrap();
        for entry in &inner.entries {
            println!("{}", entry);
        }
    }

    /// A read-only snapshot of what has been logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().unwrap().entries.clone()
    }

    /// A `tracing_subscriber::Layer` that mirrors `tracing` events emitted by
    /// library code (HPACK evictions, stream transitions, ...) into this same
    /// buffer, so a single chronological dump explains both script actions
    /// and internal protocol machinery.
    pub fn as_tracing_layer(&self) -> CaptureLayer {
        CaptureLayer {
            logger: self.clone(),
        }
    }
}

/// Render `bytes` as `offset  hex bytes  |ascii|` rows, 16 bytes per row.
pub fn hexdump_lines(bytes: &[u8]) -> Vec<String> {
    let mut out = Vec::with_capacity(bytes.len() / 16 + 1);
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let mut hex = String::with_capacity(16 * 3);
        for (i, b) in chunk.iter().enumerate() {
            if i == 8 {
                hex.push(' ');
            }
            hex.push_str(&format!("{:02x} ", b));
        }
        for _ in chunk.len()..16 {
            hex.push_str("   ");
        }
        let ascii: String = chunk
            .iter()
            .map(|&b| {
                if (0x20..0x7f).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        out.push(format!("{:08x}  {}  |{}|", row * 16, hex, ascii));
    }
    out
}

/// Bridges `tracing` spans/events into a [`Logger`].
pub struct CaptureLayer {
    logger: Logger,
}

impl<S> Layer<S> for CaptureLayer
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let source = ctx
            .event_scope(event)
            .and_then(|mut scope| scope.next().map(|s| s.name().to_string()))
            .unwrap_or_else(|| "tracing".to_string());

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.logger.log(&source, visitor.message);
    }

    fn on_new_span(&self, _attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: Context<'_, S>) {}
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hexdump_matches_16_per_row() {
        let bytes: Vec<u8> = (0u8..20).collect();
        let lines = hexdump_lines(&bytes);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000  "));
        assert!(lines[1].starts_with("00000010  "));
    }

    #[test]
    fn log_entries_accumulate_in_order() {
        let logger = Logger::new(false);
        logger.log("c0", "first");
        logger.log("s0", "second");
        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].line, "first");
        assert_eq!(entries[1].line, "second");
    }
}
