// src/types.rs

//! Small shared enums that appear in configuration, on the CLI and in
//! runtime commands.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Which kind of cycle points a workflow uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclingMode {
    Integer,
    /// ISO 8601 date-time points on the Gregorian calendar.
    #[serde(alias = "gregorian")]
    DateTime,
}

impl Default for CyclingMode {
    fn default() -> Self {
        CyclingMode::DateTime
    }
}

/// How a workflow-level stop request treats active jobs.
///
/// - `Clean`: submit nothing new, wait for active jobs to finish.
/// - `Kill`: kill active jobs, wait for the kills to be confirmed.
/// - `Now`: submit nothing new, wait only for submissions already in flight;
///   running jobs are left orphaned and polled on restart.
/// - `NowNow`: stop immediately without waiting for anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopMode {
    Clean,
    Kill,
    Now,
    NowNow,
}

impl Default for StopMode {
    fn default() -> Self {
        StopMode::Clean
    }
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopMode::Clean => "clean",
            StopMode::Kill => "kill",
            StopMode::Now => "now",
            StopMode::NowNow => "now-now",
        };
        f.write_str(s)
    }
}

impl FromStr for StopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clean" => Ok(StopMode::Clean),
            "kill" => Ok(StopMode::Kill),
            "now" => Ok(StopMode::Now),
            "now-now" | "nownow" | "now now" => Ok(StopMode::NowNow),
            other => Err(format!(
                "invalid stop mode: {other} (expected clean, kill, now or now-now)"
            )),
        }
    }
}

/// Which flow(s) a manually triggered task should belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOption {
    /// All flows currently active in the pool.
    All,
    /// Start a new flow.
    New,
    /// A specific, possibly existing, flow number.
    Number(u32),
    /// Run without a flow: the task spawns no children.
    None,
}

impl Default for FlowOption {
    fn default() -> Self {
        FlowOption::All
    }
}

impl FromStr for FlowOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(FlowOption::All),
            "new" => Ok(FlowOption::New),
            "none" => Ok(FlowOption::None),
            other => other
                .parse::<u32>()
                .map(FlowOption::Number)
                .map_err(|_| format!("invalid flow: {other} (expected all, new, none or a number)")),
        }
    }
}
