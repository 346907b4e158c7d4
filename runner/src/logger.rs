//! Console logger.
//!
//! Writes `[LEVEL target] message` lines to stderr. Installed once per
//! process with [`init`].

use std::io::Write;

use log::{LevelFilter, Log, Metadata, Record};

/// `log` backend writing to stderr
#[derive(Debug)]
pub struct ConsoleLogger {
    level: LevelFilter,
}

impl ConsoleLogger {
    /// Logger passing records at or above `level`
    pub const fn new(level: LevelFilter) -> Self {
        Self { level }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut out = std::io::stderr().lock();
        let _ = writeln!(out, "[{:<5} {}] {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: spin::Once<ConsoleLogger> = spin::Once::new();

/// Install the console logger.
///
/// Returns `false` if another logger was installed first.
pub fn init(level: LevelFilter) -> bool {
    let logger = LOGGER.call_once(|| ConsoleLogger::new(level));
    if log::set_logger(logger).is_err() {
        return false;
    }
    log::set_max_level(level);
    true
}
