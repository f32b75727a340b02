// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Pluggable log sink for hosts and clients
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 4 unit tests
//!
//! Sinks receive `(severity, message)` pairs. `ConsoleLogger` prints `[LEVEL target] message`
//! lines to stderr, `LogFacade` hands records to the `log` crate, and any
//! `Fn(i32, &str) + Send + Sync` closure is a sink as well. An absent sink drops everything.

use std::sync::Arc;

/// Severity levels understood by the built-in sinks.
pub mod severity {
    /// Per-message chatter.
    pub const DEBUG: i32 = 0;
    /// Lifecycle events.
    pub const INFO: i32 = 1;
    /// Degraded but working.
    pub const WARN: i32 = 2;
    /// Failed operation.
    pub const ERROR: i32 = 5;
}

const TARGET: &str = "portmsg";

/// Sink for diagnostic lines.
pub trait Logger: Send + Sync {
    /// Records `message` at `severity`.
    fn log(&self, severity: i32, message: &str);
}

impl<F> Logger for F
where
    F: Fn(i32, &str) + Send + Sync,
{
    fn log(&self, severity: i32, message: &str) {
        self(severity, message)
    }
}

fn label(severity: i32) -> &'static str {
    match severity {
        i32::MIN..=severity::DEBUG => "DEBUG",
        1 => "INFO",
        2..=4 => "WARN",
        _ => "ERROR",
    }
}

/// Formats the line a [`ConsoleLogger`] prints.
pub fn format_line(severity: i32, message: &str) -> String {
    format!("[{} {TARGET}] {message}", label(severity))
}

/// Writes lines at or above a minimum severity to stderr.
#[derive(Clone, Copy, Debug)]
pub struct ConsoleLogger {
    min_severity: i32,
}

impl ConsoleLogger {
    /// Console sink that drops lines below `min_severity`.
    pub const fn new(min_severity: i32) -> Self {
        Self { min_severity }
    }

    /// Lowest severity that gets printed.
    pub const fn min_severity(&self) -> i32 {
        self.min_severity
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new(severity::INFO)
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, severity: i32, message: &str) {
        if severity < self.min_severity {
            return;
        }
        eprintln!("{}", format_line(severity, message));
    }
}

/// Forwards lines to the `log` crate under the `nexus_portmsg` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogFacade;

impl LogFacade {
    /// Maps a severity onto a `log` level.
    pub fn level(severity: i32) -> log::Level {
        match severity {
            i32::MIN..=severity::DEBUG => log::Level::Debug,
            1 => log::Level::Info,
            2..=4 => log::Level::Warn,
            _ => log::Level::Error,
        }
    }
}

impl Logger for LogFacade {
    fn log(&self, severity: i32, message: &str) {
        log::log!(target: "nexus_portmsg", Self::level(severity), "{message}");
    }
}

/// Shared sink handle as stored in configurations.
pub type SharedLogger = Arc<dyn Logger>;

/// Default sink used by configurations.
pub fn default_logger() -> Option<SharedLogger> {
    Some(Arc::new(ConsoleLogger::default()))
}

/// Emits a lazily formatted line if a sink is present.
pub(crate) fn emit(logger: Option<&SharedLogger>, severity: i32, message: impl FnOnce() -> String) {
    if let Some(logger) = logger {
        logger.log(severity, &message());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn console_line_format() {
        assert_eq!(format_line(severity::INFO, "host up"), "[INFO portmsg] host up");
        assert_eq!(format_line(severity::ERROR, "boom"), "[ERROR portmsg] boom");
        assert_eq!(format_line(3, "odd"), "[WARN portmsg] odd");
    }

    #[test]
    fn facade_levels() {
        assert_eq!(LogFacade::level(severity::DEBUG), log::Level::Debug);
        assert_eq!(LogFacade::level(severity::WARN), log::Level::Warn);
        assert_eq!(LogFacade::level(42), log::Level::Error);
        LogFacade.log(severity::INFO, "no subscriber installed, dropped");
    }

    #[test]
    fn closures_are_sinks() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink: SharedLogger = {
            let lines = Arc::clone(&lines);
            Arc::new(move |severity: i32, message: &str| {
                lines.lock().push((severity, message.to_owned()));
            })
        };
        emit(Some(&sink), severity::WARN, || "slow".to_string());
        assert_eq!(lines.lock().as_slice(), &[(severity::WARN, "slow".to_string())]);
    }

    #[test]
    fn absent_sink_skips_formatting() {
        emit(None, severity::ERROR, || unreachable!("formatted without a sink"));
        assert_eq!(ConsoleLogger::default().min_severity(), severity::INFO);
    }
}
