//! Error and Result types for the harness.
//!
//! Modeled on a single opaque `Error` wrapping a private `Kind`, the way a
//! production HTTP crate keeps its error surface small and stable instead of
//! exposing an enum tree callers match exhaustively on.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type used throughout the harness.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// An error produced while parsing or executing a script.
///
/// Carries enough information to report a source line when the error
/// originated from the script parser, and an optional boxed cause for
/// errors that wrap an underlying I/O or protocol failure.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    line: Option<usize>,
    cause: Option<Cause>,
}

/// The recovery category a [`Error`] belongs to: setup, fatal, or skip.
/// (Transient I/O is not surfaced as an `Error` at all -- it is retried
/// silently by the HTTP/2 receive loop.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Script syntax error: exit code 2. (File-not-found and temp-dir
    /// creation failures short-circuit `run_file` before an `Error` with a
    /// category is ever produced, so they never reach this mapping.)
    Setup,
    /// Connection refused, malformed line, `expect` mismatch: exit code 1.
    Fatal,
    /// A `feature` gate declined: exit code 77.
    Skip,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// Script syntax error (unterminated string, unclosed brace, ...).
    Parse,
    /// Undefined macro referenced during expansion.
    UndefinedMacro,
    /// Malformed HTTP/1 request or status line, or header.
    Http1,
    /// Malformed or out-of-protocol HTTP/2 frame.
    Http2,
    /// HPACK decode failure.
    Hpack,
    /// `expect` field comparison failed.
    Expect,
    /// A `feature` gate declined.
    Skip,
    /// Barrier wait timed out.
    BarrierTimeout,
    /// Named fixture, macro, or barrier not found.
    NotFound,
    /// Socket or file I/O failure.
    Io,
    /// Subprocess failed a `-exit`/`-match`/`-expect` check, or could not spawn.
    Process,
    /// The whole test exceeded its wall-clock deadline.
    Deadline,
    /// Catch-all for user-facing script errors with a custom message.
    User,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                line: None,
                cause: None,
            }),
        }
    }

    pub(crate) fn with_cause<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn with_line(mut self, line: usize) -> Error {
        self.inner.line = Some(line);
        self
    }

    /// The source line a parse error was reported against, if known.
    pub fn line(&self) -> Option<usize> {
        self.inner.line
    }

    /// Whether this error should skip the test (exit 77) rather than fail it.
    pub fn is_skip(&self) -> bool {
        matches!(self.inner.kind, Kind::Skip)
    }

    /// Which recovery category this error falls into.
    pub fn category(&self) -> Category {
        match self.inner.kind {
            Kind::Parse => Category::Setup,
            Kind::Skip => Category::Skip,
            _ => Category::Fatal,
        }
    }

    pub(crate) fn parse(msg: impl Into<String>) -> Error {
        Error::new(Kind::Parse).with_cause(StringError(msg.into()))
    }

    pub(crate) fn user(msg: impl Into<String>) -> Error {
        Error::new(Kind::User).with_cause(StringError(msg.into()))
    }

    pub(crate) fn skip(reason: impl Into<String>) -> Error {
        Error::new(Kind::Skip).with_cause(StringError(reason.into()))
    }

    pub(crate) fn expect(msg: impl Into<String>) -> Error {
        Error::new(Kind::Expect).with_cause(StringError(msg.into()))
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Error {
        Error::new(Kind::NotFound).with_cause(StringError(msg.into()))
    }

    pub(crate) fn http1(msg: impl Into<String>) -> Error {
        Error::new(Kind::Http1).with_cause(StringError(msg.into()))
    }

    pub(crate) fn http2(msg: impl Into<String>) -> Error {
        Error::new(Kind::Http2).with_cause(StringError(msg.into()))
    }

    pub(crate) fn barrier_timeout(name: impl Into<String>) -> Error {
        Error::new(Kind::BarrierTimeout).with_cause(StringError(name.into()))
    }

    pub(crate) fn deadline() -> Error {
        Error::new(Kind::Deadline).with_cause(StringError("test deadline exceeded".into()))
    }

    pub(crate) fn process(msg: impl Into<String>) -> Error {
        Error::new(Kind::Process).with_cause(StringError(msg.into()))
    }
}

#[derive(Debug)]
struct StringError(String);

impl fmt::Display for StringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for StringError {}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("vtc::Error");
        builder.field("kind", &self.inner.kind);
        if let Some(line) = self.inner.line {
            builder.field("line", &line);
        }
        if let Some(ref cause) = self.inner.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::Parse => write!(f, "script parse error")?,
            Kind::UndefinedMacro => write!(f, "undefined macro")?,
            Kind::Http1 => write!(f, "HTTP/1 protocol error")?,
            Kind::Http2 => write!(f, "HTTP/2 protocol error")?,
            Kind::Hpack => write!(f, "HPACK decode error")?,
            Kind::Expect => write!(f, "expect mismatch")?,
            Kind::Skip => write!(f, "skipped")?,
            Kind::BarrierTimeout => write!(f, "barrier timed out")?,
            Kind::NotFound => write!(f, "not found")?,
            Kind::Io => write!(f, "I/O error")?,
            Kind::Process => write!(f, "process error")?,
            Kind::Deadline => write!(f, "deadline exceeded")?,
            Kind::User => write!(f, "error")?,
        }
        if let Some(line) = self.inner.line {
            write!(f, " at line {}", line)?;
        }
        if let Some(ref cause) = self.inner.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|c| &**c as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::new(Kind::Io).with_cause(err)
    }
}
