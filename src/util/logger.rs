//! Logging setup for the `prereq` binary.
//!
//! Diagnostics go to stderr through `tracing`; stdout carries only reports.

use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the `--log-level` directive.
pub const LOG_ENV: &str = "PREREQ_LOG";

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Filter directive for `level`, unless [`LOG_ENV`] supplies one.
pub fn filter_directive(level: LogLevel, env: Option<&str>) -> String {
    match env {
        Some(directive) if !directive.trim().is_empty() => directive.to_owned(),
        _ => format!("prereq={}", level.as_str()),
    }
}

/// Initialize the logger with specified level.
///
/// Calling it twice is harmless; the second subscriber is ignored.
pub fn init_logger(level: LogLevel) {
    let env = std::env::var(LOG_ENV).ok();
    let filter = EnvFilter::new(filter_directive(level, env.as_deref()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
