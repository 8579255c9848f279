//! Command-line argument parsing.

use clap::Parser;

use crate::logging::LogLevel;

/// Relay a single IPv6 SLAAC network across two or more Ethernet-like
/// interfaces by proxying Neighbor Discovery traffic between them.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Interfaces to proxy among; at least one, typically two or more
    #[arg(short = 'i', long = "interfaces", value_delimiter = ',', required = true)]
    pub interfaces: Vec<String>,

    /// Verbosity: error, warning, info, verbose, or debug
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    pub log_level: LogLevel,

    /// Tick period in seconds for the route expiry scan
    #[arg(short = 'a', long = "alarm-interval", default_value_t = 10)]
    pub alarm_interval: u64,

    /// Age in seconds above which a route is re-probed
    #[arg(short = 'p', long = "probe-interval", default_value_t = 60)]
    pub probe_interval: u64,

    /// Consecutive failed probes before a route is deleted
    #[arg(short = 'r', long = "probe-retries", default_value_t = 5)]
    pub probe_retries: u32,

    /// Persist known routes here across restarts; empty disables persistence
    #[arg(short = 'f', long = "routes-save-file", default_value = "")]
    pub routes_save_file: String,
}

impl clap::builder::ValueParserFactory for LogLevel {
    type Parser = LogLevelParser;

    fn value_parser() -> Self::Parser {
        LogLevelParser
    }
}

#[derive(Clone)]
pub struct LogLevelParser;

impl clap::builder::TypedValueParser for LogLevelParser {
    type Value = LogLevel;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let s = value.to_str().ok_or_else(|| {
            clap::Error::raw(clap::error::ErrorKind::InvalidUtf8, "invalid UTF-8 value")
        })?;
        s.parse::<LogLevel>().map_err(|e| {
            let mut err = clap::Error::new(clap::error::ErrorKind::InvalidValue).with_cmd(cmd);
            if let Some(arg) = arg {
                err.insert(
                    clap::error::ContextKind::InvalidArg,
                    clap::error::ContextValue::String(arg.to_string()),
                );
            }
            err.insert(
                clap::error::ContextKind::InvalidValue,
                clap::error::ContextValue::String(e),
            );
            err
        })
    }
}
