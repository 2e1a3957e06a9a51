// src/task/state.rs

//! Task status and the transition function that is the only way to change it.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStatus {
    Waiting,
    /// Released from its queue; submission in flight.
    Preparing,
    Submitted,
    SubmitFailed,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Preparing => "preparing",
            TaskStatus::Submitted => "submitted",
            TaskStatus::SubmitFailed => "submit-failed",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    /// Preparing, submitted or running: a job exists or is being made.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Preparing | TaskStatus::Submitted | TaskStatus::Running
        )
    }

    pub fn is_final(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::SubmitFailed
        )
    }

    /// How far through one job's lifecycle this status is.
    pub fn job_rank(self) -> u8 {
        match self {
            TaskStatus::Waiting | TaskStatus::Preparing => 0,
            TaskStatus::Submitted | TaskStatus::SubmitFailed => 1,
            TaskStatus::Running => 2,
            TaskStatus::Succeeded | TaskStatus::Failed => 3,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskStatus::Waiting),
            "preparing" => Ok(TaskStatus::Preparing),
            "submitted" => Ok(TaskStatus::Submitted),
            "submit-failed" => Ok(TaskStatus::SubmitFailed),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Everything that may move a proxy between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    /// Released from a queue, or submission retry fired.
    Prepare,
    /// Manual trigger: a waiting or final proxy goes straight to preparing.
    ForceTrigger,
    JobSubmitted,
    JobSubmitFailed,
    JobStarted,
    JobSucceeded,
    JobFailed,
    /// A retry timer was armed; back to waiting until it fires.
    Retry,
    /// Manual hold and release. Status is unchanged.
    Hold,
    Release,
    /// Manual kill: flags an active job for killing, or cancels a pending
    /// retry and holds the proxy.
    Kill,
}

impl TaskAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskAction::Prepare => "prepare",
            TaskAction::ForceTrigger => "trigger",
            TaskAction::JobSubmitted => "submitted",
            TaskAction::JobSubmitFailed => "submit-failed",
            TaskAction::JobStarted => "started",
            TaskAction::JobSucceeded => "succeeded",
            TaskAction::JobFailed => "failed",
            TaskAction::Retry => "retry",
            TaskAction::Hold => "hold",
            TaskAction::Release => "release",
            TaskAction::Kill => "kill",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot apply {action:?} to a {from} task")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub action: TaskAction,
}

/// The transition table.
pub fn next_status(from: TaskStatus, action: TaskAction) -> Result<TaskStatus, TransitionError> {
    use TaskAction as A;
    use TaskStatus as S;
    let to = match (from, action) {
        (S::Waiting, A::Prepare) => S::Preparing,
        (S::Waiting | S::Succeeded | S::Failed | S::SubmitFailed, A::ForceTrigger) => S::Preparing,
        (S::Preparing, A::JobSubmitted) => S::Submitted,
        (S::Preparing | S::Submitted, A::JobSubmitFailed) => S::SubmitFailed,
        (S::Submitted, A::JobStarted) => S::Running,
        (S::Running, A::JobSucceeded) => S::Succeeded,
        (S::Running, A::JobFailed) => S::Failed,
        (S::Failed | S::SubmitFailed, A::Retry) => S::Waiting,
        (s, A::Hold | A::Release) => s,
        (s @ (S::Waiting | S::Preparing | S::Submitted | S::Running), A::Kill) => s,
        _ => return Err(TransitionError { from, action }),
    };
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_the_normal_job_lifecycle() {
        let mut s = TaskStatus::Waiting;
        for action in [
            TaskAction::Prepare,
            TaskAction::JobSubmitted,
            TaskAction::JobStarted,
            TaskAction::JobSucceeded,
        ] {
            s = next_status(s, action).unwrap();
        }
        assert_eq!(s, TaskStatus::Succeeded);
    }

    #[test]
    fn rejects_skipping_states() {
        let err = next_status(TaskStatus::Waiting, TaskAction::JobSucceeded).unwrap_err();
        assert_eq!(err.from, TaskStatus::Waiting);
        assert!(next_status(TaskStatus::Succeeded, TaskAction::Retry).is_err());
        assert!(next_status(TaskStatus::Running, TaskAction::ForceTrigger).is_err());
    }

    #[test]
    fn failures_can_retry() {
        assert_eq!(
            next_status(TaskStatus::Failed, TaskAction::Retry),
            Ok(TaskStatus::Waiting)
        );
        assert_eq!(
            next_status(TaskStatus::SubmitFailed, TaskAction::Retry),
            Ok(TaskStatus::Waiting)
        );
    }

    #[test]
    fn manual_interventions_keep_the_status() {
        for s in [TaskStatus::Waiting, TaskStatus::Running, TaskStatus::Failed] {
            assert_eq!(next_status(s, TaskAction::Hold), Ok(s));
            assert_eq!(next_status(s, TaskAction::Release), Ok(s));
        }
        assert_eq!(
            next_status(TaskStatus::Submitted, TaskAction::Kill),
            Ok(TaskStatus::Submitted)
        );
        assert!(next_status(TaskStatus::Succeeded, TaskAction::Kill).is_err());
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            TaskStatus::Waiting,
            TaskStatus::Preparing,
            TaskStatus::Submitted,
            TaskStatus::SubmitFailed,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<TaskStatus>(), Ok(s));
        }
    }
}
