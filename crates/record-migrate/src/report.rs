//! Progress and summary reporting contract.
//!
//! The executor never talks to a process-wide logger directly; it is handed
//! a [`Reporter`] capability at construction so scripts can route output to
//! a console and tests can substitute a silent or capturing implementation.
//! Reporting failures are swallowed, never escalated: the absence of a
//! reporter must not change migration outcomes.

/// Severity for [`Reporter::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Console colors for [`Reporter::print`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Red,
    Yellow,
    Cyan,
}

/// Narrow log/print contract consumed by the engine.
pub trait Reporter: Send + Sync {
    /// Structured progress/diagnostic message.
    fn log(&self, level: LogLevel, message: &str);

    /// User-facing line, optionally colored.
    fn print(&self, message: &str, color: Option<Color>);
}

/// Default reporter backed by the `tracing` macros.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }

    fn print(&self, message: &str, _color: Option<Color>) {
        tracing::info!("{}", message);
    }
}

/// Reporter that drops everything.
#[derive(Debug, Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn log(&self, _level: LogLevel, _message: &str) {}
    fn print(&self, _message: &str, _color: Option<Color>) {}
}
