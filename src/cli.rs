// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `cyclerun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cyclerun",
    version,
    about = "Run a cycling workflow of dependent tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "flow.toml")]
    pub config: String,

    /// Path to the run database.
    ///
    /// Default: `cyclerun.db` beside the workflow file.
    #[arg(long, value_name = "PATH")]
    pub db: Option<String>,

    /// Continue the run recorded in the database instead of starting fresh.
    #[arg(long)]
    pub restart: bool,

    /// Stop after this cycle point (overrides the stored one on restart).
    #[arg(long, value_name = "POINT")]
    pub stopcp: Option<String>,

    /// Stop once this task succeeds.
    #[arg(long, value_name = "POINT/NAME")]
    pub stop_task: Option<String>,

    /// Start with every task held.
    #[arg(long)]
    pub hold: bool,

    /// Reload the workflow when its file changes.
    #[arg(long)]
    pub watch_config: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CYCLERUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the task definitions, but don't run anything.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_restart_overrides() {
        let args = CliArgs::parse_from([
            "cyclerun",
            "--restart",
            "--stopcp",
            "20",
            "--stop-task",
            "5/foo",
            "--log-level",
            "debug",
        ]);
        assert!(args.restart);
        assert_eq!(args.config, "flow.toml");
        assert_eq!(args.stopcp.as_deref(), Some("20"));
        assert_eq!(args.stop_task.as_deref(), Some("5/foo"));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
