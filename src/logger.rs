//! Stderr sink for the library's diagnostics.
//!
//! Debug builds show everything down to `debug!`; release builds keep only
//! warnings and errors, mirroring a compile-time debug switch.

use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("{}: {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

pub fn init() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
