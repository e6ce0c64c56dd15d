//! Command-line interface for justrun.
use clap::{Parser, Subcommand};
use std::{path::PathBuf, str::FromStr};
use tracing::level_filters::LevelFilter;

use crate::constants::{DEFAULT_ADDRESS, DEFAULT_PORT};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for justrun.
#[derive(Parser)]
#[command(name = "jrun", version, author)]
#[command(about = "A simple yet extensible cross-platform service supervisor", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Daemon listen address.
    #[arg(long, alias = "addr", global = true, default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Daemon listen port.
    #[arg(long, short = 'p', global = true, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Shared secret; read from (or generated into) the password file when
    /// omitted.
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Configuration directory (defaults to `~/.config/justrun`).
    #[arg(long, alias = "conf", global = true, value_name = "DIR")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output instead of plain text.
    #[arg(long, global = true)]
    pub json: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for justrun.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the supervisor daemon in the foreground.
    Serve {
        /// Honor runit-style sibling `down` hooks when stopping services.
        #[arg(long)]
        runit_compat: bool,
    },

    /// Add services to the roster (disabled at boot).
    Add {
        /// Service executable paths.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Delete services from the roster.
    Del {
        /// Service paths or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Mark services as started at boot.
    Enable {
        /// Service paths or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Mark services as not started at boot.
    Disable {
        /// Service paths or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Start services.
    Start {
        /// Service paths or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Stop services and drop them from the runner table.
    Stop {
        /// Service paths or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Restart services.
    Restart {
        /// Service paths or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Re-resolve configuration, hot-swapping stream redirections.
    Reload {
        /// Service paths or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Show the full snapshot of individual services.
    Status {
        /// Service paths or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Show the aggregate status of every known service.
    List,

    /// Reap non-running services from the runner table.
    Gc,

    /// Ask the daemon to shut down.
    Shutdown,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
