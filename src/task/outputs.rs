// src/task/outputs.rs

//! Task outputs: the standard job-lifecycle outputs plus custom ones.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

pub const SUBMITTED: &str = "submitted";
pub const SUBMIT_FAILED: &str = "submit-failed";
pub const STARTED: &str = "started";
pub const SUCCEEDED: &str = "succeeded";
pub const FAILED: &str = "failed";

pub const STANDARD_OUTPUTS: [&str; 5] = [SUBMITTED, SUBMIT_FAILED, STARTED, SUCCEEDED, FAILED];

/// Map a trigger qualifier to a standard output label, accepting the short
/// forms (`succeed`, `fail`, ...).
pub fn standard_output(qualifier: &str) -> Option<&'static str> {
    match qualifier {
        "succeed" | "succeeded" => Some(SUCCEEDED),
        "fail" | "failed" => Some(FAILED),
        "submit" | "submitted" => Some(SUBMITTED),
        "submit-fail" | "submit-failed" => Some(SUBMIT_FAILED),
        "start" | "started" => Some(STARTED),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OutputEntry {
    message: String,
    completed: Option<DateTime<Utc>>,
}

/// The outputs of one proxy. Each label completes at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutputs {
    entries: BTreeMap<String, OutputEntry>,
    required: BTreeSet<String>,
}

impl TaskOutputs {
    pub fn new<'a>(
        custom: impl IntoIterator<Item = (&'a str, &'a str)>,
        required: BTreeSet<String>,
    ) -> Self {
        let mut entries = BTreeMap::new();
        for label in STANDARD_OUTPUTS {
            entries.insert(
                label.to_string(),
                OutputEntry {
                    message: label.to_string(),
                    completed: None,
                },
            );
        }
        for (label, message) in custom {
            entries.insert(
                label.to_string(),
                OutputEntry {
                    message: message.to_string(),
                    completed: None,
                },
            );
        }
        Self { entries, required }
    }

    /// Record `label`. Returns true only the first time.
    pub fn complete(&mut self, label: &str, at: DateTime<Utc>) -> bool {
        match self.entries.get_mut(label) {
            Some(entry) if entry.completed.is_none() => {
                entry.completed = Some(at);
                true
            }
            _ => false,
        }
    }

    pub fn is_completed(&self, label: &str) -> bool {
        self.entries
            .get(label)
            .is_some_and(|e| e.completed.is_some())
    }

    /// Label whose message text matches `message`, if any.
    pub fn label_for_message(&self, message: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, e)| e.message == message)
            .map(|(label, _)| label.as_str())
    }

    pub fn completed(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.entries
            .iter()
            .filter_map(|(label, e)| e.completed.map(|t| (label.as_str(), t)))
    }

    pub fn completed_labels(&self) -> BTreeSet<String> {
        self.completed().map(|(l, _)| l.to_string()).collect()
    }

    pub fn missing_required(&self) -> Vec<&str> {
        self.required
            .iter()
            .filter(|label| !self.is_completed(label))
            .map(String::as_str)
            .collect()
    }

    pub fn all_required_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    /// `{"label": "rfc3339 time"}` for the completed outputs.
    pub fn to_json(&self) -> String {
        let map: BTreeMap<&str, String> = self
            .completed()
            .map(|(label, t)| (label, t.to_rfc3339()))
            .collect();
        serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
    }

    /// Restore completion times from [`TaskOutputs::to_json`] output.
    /// Unknown labels are ignored.
    pub fn restore_json(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let map: BTreeMap<String, String> = serde_json::from_str(json)?;
        for (label, time) in map {
            let at = DateTime::parse_from_rfc3339(&time)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH);
            if let Some(entry) = self.entries.get_mut(&label) {
                entry.completed = Some(at);
            }
        }
        Ok(())
    }
}
