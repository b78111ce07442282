//! Logging infrastructure for uefivar
//!
//! This module provides logging via the `log` crate, outputting to stderr.
//! Audit records of the variable store arrive with target `audit`.

use std::io::Write;

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// Stderr logger implementation
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let level_str = match record.level() {
                Level::Error => "\x1b[31mERROR\x1b[0m",
                Level::Warn => "\x1b[33mWARN\x1b[0m ",
                Level::Info => "\x1b[32mINFO\x1b[0m ",
                Level::Debug => "\x1b[34mDEBUG\x1b[0m",
                Level::Trace => "\x1b[35mTRACE\x1b[0m",
            };

            // Format: [LEVEL] target: message
            let _ = writeln!(
                std::io::stderr().lock(),
                "[{}] {}: {}",
                level_str,
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: StderrLogger = StderrLogger;

/// Initialize the logging subsystem
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}
