// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_SETTINGS_PATH;

/// Command-line arguments for `gwf-local`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gwf-local",
    version,
    about = "Local task-execution backend for workflow runs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the settings file (TOML). Missing file means defaults.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SETTINGS_PATH)]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `GWF_LOCAL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start a pool of local workers. Stop with Ctrl-C.
    Workers {
        /// Core budget. Defaults to the number of cores on this machine.
        #[arg(short = 'n', long = "cores", value_name = "CORES")]
        cores: Option<u32>,

        /// Host to listen on.
        #[arg(long, value_name = "HOST")]
        host: Option<String>,

        /// Port to listen on.
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Submit a named target to the workers.
    ///
    /// The script is taken from --script, or read from stdin.
    Submit {
        /// Target name, used to track the task across invocations.
        name: String,

        /// Shell script text to run.
        #[arg(long, value_name = "TEXT")]
        script: Option<String>,

        /// Directory the script runs in (default: current directory).
        #[arg(long, value_name = "DIR")]
        working_dir: Option<PathBuf>,

        /// Cores the task occupies while running.
        #[arg(long, value_name = "N", default_value_t = 1)]
        cores: u32,

        /// Previously submitted target this one depends on. Repeatable.
        #[arg(long = "after", value_name = "NAME")]
        after: Vec<String>,
    },

    /// Print the status of a target.
    Status { name: String },

    /// Cancel a target's task.
    Cancel { name: String },

    /// Print a target's log.
    Logs {
        name: String,

        /// Print standard error instead of standard output.
        #[arg(long)]
        stderr: bool,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
