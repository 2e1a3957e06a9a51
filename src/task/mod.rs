// src/task/mod.rs

//! Task proxies and the pieces they are made of.

pub mod flow;
pub mod outputs;
pub mod prerequisite;
pub mod proxy;
pub mod state;

use std::fmt;

use chrono::{DateTime, Utc};

use crate::cycling::{CyclePoint, CyclingContext};
use crate::errors::{CyclerunError, Result};

pub use flow::{FlowManager, FlowNums};
pub use proxy::{PendingRetry, RetryKind, TaskProxy};
pub use state::{TaskAction, TaskStatus, TransitionError};

/// `point/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub point: CyclePoint,
    pub name: String,
}

impl TaskId {
    pub fn new(point: CyclePoint, name: impl Into<String>) -> Self {
        Self {
            point,
            name: name.into(),
        }
    }

    pub fn parse(s: &str, cycling: &CyclingContext) -> Result<Self> {
        let (point, name) = s
            .split_once('/')
            .ok_or_else(|| CyclerunError::config(format!("invalid task id '{s}' (expected point/name)")))?;
        Ok(Self::new(cycling.parse_point(point)?, name))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.point, self.name)
    }
}

/// One proxy status transition, as published to sinks and `task_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub id: TaskId,
    pub flow_nums: FlowNums,
    pub action: TaskAction,
    pub old: TaskStatus,
    pub new: TaskStatus,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CyclingMode;
    use chrono::FixedOffset;

    #[test]
    fn parses_and_displays_ids() {
        let ctx = CyclingContext::new(
            CyclingMode::DateTime,
            "2015",
            None,
            FixedOffset::east_opt(0).unwrap(),
        )
        .unwrap();
        let id = TaskId::parse("2016/foo", &ctx).unwrap();
        assert_eq!(id.to_string(), "20160101T0000Z/foo");
        assert!(TaskId::parse("foo", &ctx).is_err());
    }
}
