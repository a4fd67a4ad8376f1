//! Logging infrastructure for CrabSD
//!
//! This module provides a `log` backend that formats records onto a
//! platform-supplied [`LogSink`] (a serial port, a memory console, ...).
//! Timestamps come from an optional registered [`Clock`]; without one they
//! read zero.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use spin::{Once, RwLock};

use crate::time::Clock;

/// Byte-oriented output the platform provides for log lines
pub trait LogSink: Sync {
    fn write_str(&self, s: &str);
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Time source for log timestamps
static CLOCK: RwLock<Option<&'static (dyn Clock + Sync)>> = RwLock::new(None);

/// Microseconds on the registered clock
pub fn get_timestamp_us() -> u64 {
    (*CLOCK.read()).map_or(0, |clock| clock.now_nanoseconds() / 1000)
}

/// Level strings padded to a common width
fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Write one log line: `[timestamp] [LEVEL] message`
fn write_record<W: Write>(
    out: &mut W,
    timestamp_us: u64,
    level: Level,
    args: &fmt::Arguments<'_>,
) -> fmt::Result {
    writeln!(out, "[{:>10}] [{}] {}", timestamp_us, level_str(level), args)
}

/// Logger writing every enabled record to a sink
struct SinkLogger {
    sink: &'static dyn LogSink,
}

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut writer = SinkWriter(self.sink);
            let _ = write_record(
                &mut writer,
                get_timestamp_us(),
                record.level(),
                record.args(),
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: Once<SinkLogger> = Once::new();

/// Initialize the logging subsystem.
///
/// Fails if a logger is already installed.
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| SinkLogger { sink });
    log::set_logger(logger).map(|()| log::set_max_level(level))
}

/// Register the clock used for timestamps
pub fn set_clock(clock: &'static (dyn Clock + Sync)) {
    *CLOCK.write() = Some(clock);
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
