//! Console backend for the `log` facade.
//!
//! Informational records are the loader's report and go to stdout as plain
//! lines. Everything else goes to stderr with its level.

use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// The global logger instance used for the `log` crate.
static LOGGER: ConsoleLogger = ConsoleLogger;

/// Writes records to the process's standard streams.
#[derive(Debug)]
pub struct ConsoleLogger;

impl ConsoleLogger {
    fn render(record: &Record<'_>) -> String {
        match record.level() {
            Level::Info => format!("{}", record.args()),
            level => format!("[{level}] {}", record.args()),
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::render(record);
        // A closed stream is not worth dying over.
        let _ = if record.level() == Level::Info {
            writeln!(std::io::stdout().lock(), "{line}")
        } else {
            writeln!(std::io::stderr().lock(), "{line}")
        };
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}

/// Install the console logger with `level` as the maximum
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
