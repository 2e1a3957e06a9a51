// src/task/flow.rs

//! Flow numbers and the registry of flows started so far.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};

/// The flows a proxy belongs to. Empty means "no flow": the proxy runs but
/// spawns nothing downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FlowNums(BTreeSet<u32>);

impl FlowNums {
    pub fn new(nums: impl IntoIterator<Item = u32>) -> Self {
        Self(nums.into_iter().collect())
    }

    pub fn single(n: u32) -> Self {
        Self(BTreeSet::from([n]))
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn overlaps(&self, other: &FlowNums) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn merge(&mut self, other: &FlowNums) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().copied());
        self.0.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// JSON array form stored in the database.
    pub fn to_db_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_db_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<BTreeSet<u32>>(s).map(Self)
    }
}

impl fmt::Display for FlowNums {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let nums: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&nums.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub number: u32,
    pub start_time: DateTime<Utc>,
    pub description: String,
}

/// Allocates flow numbers and remembers when and why each flow started.
#[derive(Debug, Clone, Default)]
pub struct FlowManager {
    flows: BTreeMap<u32, FlowRecord>,
}

impl FlowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new flow with the next free number.
    pub fn new_flow(&mut self, description: &str, now: DateTime<Utc>) -> FlowRecord {
        let number = self.flows.keys().next_back().map_or(1, |n| n + 1);
        let record = FlowRecord {
            number,
            start_time: now,
            description: description.to_string(),
        };
        self.flows.insert(number, record.clone());
        record
    }

    /// Register `number` if it is not known yet. Returns the new record.
    pub fn ensure(&mut self, number: u32, description: &str, now: DateTime<Utc>) -> Option<FlowRecord> {
        if self.flows.contains_key(&number) {
            return None;
        }
        let record = FlowRecord {
            number,
            start_time: now,
            description: description.to_string(),
        };
        self.flows.insert(number, record.clone());
        Some(record)
    }

    pub fn restore(&mut self, records: impl IntoIterator<Item = FlowRecord>) {
        for record in records {
            self.flows.insert(record.number, record);
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &FlowRecord> {
        self.flows.values()
    }
}
