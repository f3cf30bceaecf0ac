//! Injected logging capability.
//!
//! Components log through a [`LogSink`] instead of a global logger so the
//! embedding application decides where messages go. [`TracingSink`] is the
//! default and forwards to `tracing`; any `Fn(LogLevel, &str)` closure also
//! works.

use std::fmt;
use std::sync::Arc;

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Recoverable problem.
    Warning,
    /// Operation failed.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

/// Destination for log messages. Messages never contain secret values.
pub trait LogSink: Send + Sync {
    /// Record one message.
    fn log(&self, level: LogLevel, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn log(&self, level: LogLevel, message: &str) {
        self(level, message);
    }
}

/// Forwards to the `tracing` macros under the `robovault` target.
///
/// Installing a subscriber is the application's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "robovault", "{message}"),
            LogLevel::Info => tracing::info!(target: "robovault", "{message}"),
            LogLevel::Warning => tracing::warn!(target: "robovault", "{message}"),
            LogLevel::Error => tracing::error!(target: "robovault", "{message}"),
        }
    }
}

/// Shared default sink.
#[must_use]
pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingSink)
}
