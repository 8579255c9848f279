//! Verbosity levels and logger initialization.

use std::fmt;
use std::str::FromStr;

/// The five verbosity levels accepted by `-l`/`--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
}

impl LogLevel {
    fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            // There is no separate "verbose" level in the `log` crate; it
            // maps onto Debug, with our own Debug level mapping to Trace.
            LogLevel::Verbose => log::LevelFilter::Debug,
            LogLevel::Debug => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warning" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// Initialize the global logger at the requested level. Output goes to
/// stderr, one line per record.
pub fn init(level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(level.as_filter())
        .format_timestamp_millis()
        .init();
}
