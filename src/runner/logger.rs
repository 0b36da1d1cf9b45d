use std::collections::HashMap;
use std::fmt;

use tracing::{debug, error, info, warn};

/// Where a reported source lives in the run tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    /// Fully-qualified node name.
    pub path: String,
    /// Display qualifier of the run, e.g. `" (sqlite)"`.
    pub qualifier: String,
}

impl Location {
    pub fn new(path: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            qualifier: qualifier.into(),
        }
    }
}

/// Receives every reported outcome and brackets every invocation so
/// captured output is attributed to the right source.
pub trait TestLogger {
    fn log_pass(&mut self, source: &str, location: &Location);
    fn log_failure(&mut self, source: &str, reason: &str, location: &Location);
    fn log_error(&mut self, source: &str, reason: &str, location: &Location);
    fn log_skip(&mut self, source: &str, reason: &str, location: &Location);
    fn start_buffering(&mut self, source: &str);
    fn end_buffering(&mut self);
    fn write_output(&mut self, text: &str);
    /// Drop everything captured so far for `source`.
    fn discard_output(&mut self, source: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Pass,
    Failure,
    Error,
    Skip,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Failure => write!(f, "failure"),
            Self::Error => write!(f, "error"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// One reported outcome, in report order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub kind: EventKind,
    pub source: String,
    pub reason: Option<String>,
    pub location: Location,
}

/// In-memory [`TestLogger`] that keeps every event and the output written
/// while each source was buffering. Events are mirrored to `tracing`.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<LogEvent>,
    buffers: HashMap<String, String>,
    active: Vec<String>,
    stream: bool,
}

impl EventLog {
    /// A log that captures output (`true`) or streams it to stdout (`false`).
    pub fn new(capture_output: bool) -> Self {
        Self {
            stream: !capture_output,
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    /// Output captured for `source`, if it wrote anything.
    pub fn output(&self, source: &str) -> Option<&str> {
        self.buffers.get(source).map(String::as_str)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    fn push(&mut self, kind: EventKind, source: &str, reason: Option<&str>, location: &Location) {
        self.events.push(LogEvent {
            kind,
            source: source.to_owned(),
            reason: reason.map(str::to_owned),
            location: location.clone(),
        });
    }
}

impl TestLogger for EventLog {
    fn log_pass(&mut self, source: &str, location: &Location) {
        debug!(source, qualifier = %location.qualifier, "passed");
        self.push(EventKind::Pass, source, None, location);
    }

    fn log_failure(&mut self, source: &str, reason: &str, location: &Location) {
        warn!(source, qualifier = %location.qualifier, "failed: {reason}");
        self.push(EventKind::Failure, source, Some(reason), location);
    }

    fn log_error(&mut self, source: &str, reason: &str, location: &Location) {
        error!(source, qualifier = %location.qualifier, "error: {reason}");
        self.push(EventKind::Error, source, Some(reason), location);
    }

    fn log_skip(&mut self, source: &str, reason: &str, location: &Location) {
        info!(source, qualifier = %location.qualifier, "skipped: {reason}");
        self.push(EventKind::Skip, source, Some(reason), location);
    }

    fn start_buffering(&mut self, source: &str) {
        self.active.push(source.to_owned());
    }

    fn end_buffering(&mut self) {
        self.active.pop();
    }

    fn write_output(&mut self, text: &str) {
        if self.stream {
            println!("{text}");
            return;
        }
        let source = self.active.last().cloned().unwrap_or_default();
        let buffer = self.buffers.entry(source).or_default();
        buffer.push_str(text);
        buffer.push('\n');
    }

    fn discard_output(&mut self, source: &str) {
        self.buffers.remove(source);
    }
}
