// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::types::parse_duration;

/// Command-line arguments for `unitdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "unitdag",
    version,
    about = "Run units of agent tasks in dependency order with bounded parallelism.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the plan file (TOML).
    ///
    /// Default: `Unitdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Unitdag.toml")]
    pub plan: PathBuf,

    /// Maximum number of units executing at once. Overrides
    /// `[config].max_parallel`.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_parallel: Option<u32>,

    /// How long running units get to unwind on shutdown (e.g. "30s").
    /// Overrides `[config].shutdown_timeout`.
    #[arg(long, value_name = "DUR", value_parser = parse_duration)]
    pub shutdown_timeout: Option<Duration>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `UNITDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the unit graph, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
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
