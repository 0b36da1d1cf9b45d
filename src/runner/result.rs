use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Early exit from a test body or fixture.
///
/// Bodies return `Result<(), Interrupt>`, so `?` on [`Context::requires`]
/// unwinds exactly one test invocation when a prerequisite is missing.
///
/// [`Context::requires`]: crate::runner::context::Context::requires
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Interrupt {
    /// An assertion did not hold.
    #[error("{0}")]
    Failure(String),
    /// Anything else went wrong.
    #[error("{0}")]
    Error(String),
    /// The callable opted out.
    #[error("{0}")]
    Skip(String),
    /// A prerequisite has no recorded result yet; retry in a later pass.
    #[error("postponed until its prerequisites have run")]
    Postpone,
}

impl Interrupt {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }
}

/// What a test body or fixture returns.
pub type TestResult = Result<(), Interrupt>;

/// Tagged outcome of one leaf invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    Fail(String),
    Error(String),
    Skip(String),
    Postpone,
}

impl TestOutcome {
    /// Convert a body's return value, folding in subtest failures.
    pub fn from_result(result: TestResult, failed_subtests: usize) -> Self {
        match result {
            Ok(()) if failed_subtests == 1 => Self::Fail("1 subtest failed".to_owned()),
            Ok(()) if failed_subtests > 1 => Self::Fail(format!("{failed_subtests} subtests failed")),
            Ok(()) => Self::Pass,
            Err(Interrupt::Failure(message)) => Self::Fail(message),
            Err(Interrupt::Error(message)) => Self::Error(message),
            Err(Interrupt::Skip(reason)) => Self::Skip(reason),
            Err(Interrupt::Postpone) => Self::Postpone,
        }
    }

    /// The status this outcome is reported with. `Postpone` has none.
    pub fn status(&self) -> Option<TestStatus> {
        match self {
            Self::Pass => Some(TestStatus::Passed),
            Self::Fail(_) => Some(TestStatus::Failed),
            Self::Error(_) => Some(TestStatus::Error),
            Self::Skip(_) => Some(TestStatus::Skipped),
            Self::Postpone => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Fail(m) | Self::Error(m) | Self::Skip(m) => Some(m),
            Self::Pass | Self::Postpone => None,
        }
    }
}

/// Final reported status of a test, fixture or dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// What produced a [`TestRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Test,
    Fixture,
    /// A prerequisite named by `requires()` that never ran.
    Dependency,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Fixture => write!(f, "fixture"),
            Self::Dependency => write!(f, "dependency"),
        }
    }
}

/// Reported status of one source under one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub source: String,
    pub kind: RecordKind,
    pub run_hash: String,
    /// Display suffix of the run, e.g. `" (sqlite)"`.
    pub qualifier: String,
    pub status: TestStatus,
    pub message: Option<String>,
    /// Output captured while the source ran; attached to failures only.
    pub output: Option<String>,
}

impl TestRecord {
    pub fn new(
        source: impl Into<String>,
        kind: RecordKind,
        run_hash: impl Into<String>,
        qualifier: impl Into<String>,
        status: TestStatus,
        message: Option<String>,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            run_hash: run_hash.into(),
            qualifier: qualifier.into(),
            status,
            message,
            output: None,
        }
    }

    /// Source name with the run qualifier appended.
    pub fn display_name(&self) -> String {
        format!("{}{}", self.source, self.qualifier)
    }

    /// Failed and errored records make a run unsuccessful; skips do not.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TestStatus::Failed | TestStatus::Error)
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_owned()
    }
}
