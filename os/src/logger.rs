//! `log` backend writing to the serial port.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};

use crate::config::LOG_LEVEL;
use crate::serial;

/// Line-oriented serial logger. One record becomes one `[LEVEL] message` line.
pub struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= LOG_LEVEL
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(serial::Writer, "[{:<5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Bring up COM1 and install the serial logger.
///
/// A second call keeps the already installed logger.
pub fn init() {
    serial::init();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LOG_LEVEL);
    }
}

/// Current maximum level, for the boot banner.
pub fn level() -> LevelFilter {
    log::max_level()
}
