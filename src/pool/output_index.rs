// src/pool/output_index.rs

//! Outputs of task instances by `(point, name)`, kept after proxies leave
//! the pool.
//!
//! Mirrors the `task_outputs` table: restart reloads it from there, and new
//! proxies satisfy conditions on already-pruned parents from it.

use std::collections::{BTreeMap, BTreeSet};

use crate::cycling::CyclePoint;
use crate::task::FlowNums;
use crate::task::prerequisite::ConditionKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub flow_nums: FlowNums,
    pub submit_num: u32,
    pub outputs: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OutputIndex {
    entries: BTreeMap<(CyclePoint, String), Vec<OutputRecord>>,
}

impl OutputIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outputs of one job, replacing an earlier record for the
    /// same flows.
    pub fn record(
        &mut self,
        point: &CyclePoint,
        name: &str,
        flow_nums: &FlowNums,
        submit_num: u32,
        outputs: BTreeSet<String>,
    ) {
        let records = self
            .entries
            .entry((point.clone(), name.to_string()))
            .or_default();
        match records.iter_mut().find(|r| r.flow_nums == *flow_nums) {
            Some(existing) => {
                existing.submit_num = existing.submit_num.max(submit_num);
                existing.outputs.extend(outputs);
            }
            None => records.push(OutputRecord {
                flow_nums: flow_nums.clone(),
                submit_num,
                outputs,
            }),
        }
    }

    /// True if `key` was completed in a flow overlapping `flows`. A no-flow
    /// request matches any flow.
    pub fn is_completed(&self, key: &ConditionKey, flows: &FlowNums) -> bool {
        self.entries
            .get(&(key.point.clone(), key.task.clone()))
            .is_some_and(|records| {
                records.iter().any(|r| {
                    (flows.is_none() || r.flow_nums.overlaps(flows)) && r.outputs.contains(&key.output)
                })
            })
    }

    /// True if the task already ran at `point` in any of `flows`.
    pub fn has_run_in(&self, point: &CyclePoint, name: &str, flows: &FlowNums) -> bool {
        if flows.is_none() {
            return false;
        }
        self.entries
            .get(&(point.clone(), name.to_string()))
            .is_some_and(|records| records.iter().any(|r| r.flow_nums.overlaps(flows)))
    }

    /// Highest submit number recorded for `(point, name)` in any flow.
    pub fn max_submit_num(&self, point: &CyclePoint, name: &str) -> u32 {
        self.entries
            .get(&(point.clone(), name.to_string()))
            .and_then(|records| records.iter().map(|r| r.submit_num).max())
            .unwrap_or(0)
    }

    /// Forget entries older than `before`; the database keeps them.
    pub fn housekeep(&mut self, before: &CyclePoint) {
        self.entries.retain(|(point, _), _| point >= before);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(output: &str) -> ConditionKey {
        ConditionKey {
            task: "foo".to_string(),
            point: CyclePoint::Integer(1),
            output: output.to_string(),
        }
    }

    #[test]
    fn lookups_respect_flows() {
        let mut idx = OutputIndex::new();
        idx.record(
            &CyclePoint::Integer(1),
            "foo",
            &FlowNums::single(1),
            1,
            BTreeSet::from(["succeeded".to_string()]),
        );
        assert!(idx.is_completed(&key("succeeded"), &FlowNums::new([1, 2])));
        assert!(!idx.is_completed(&key("succeeded"), &FlowNums::single(2)));
        assert!(!idx.is_completed(&key("failed"), &FlowNums::single(1)));
        assert!(idx.is_completed(&key("succeeded"), &FlowNums::none()));
        assert!(idx.has_run_in(&CyclePoint::Integer(1), "foo", &FlowNums::single(1)));
        assert!(!idx.has_run_in(&CyclePoint::Integer(1), "foo", &FlowNums::none()));
    }

    #[test]
    fn merges_records_for_the_same_flows() {
        let mut idx = OutputIndex::new();
        let flows = FlowNums::single(1);
        idx.record(&CyclePoint::Integer(1), "foo", &flows, 1, BTreeSet::from(["submitted".to_string()]));
        idx.record(&CyclePoint::Integer(1), "foo", &flows, 2, BTreeSet::from(["failed".to_string()]));
        assert_eq!(idx.max_submit_num(&CyclePoint::Integer(1), "foo"), 2);
        assert!(idx.is_completed(&key("submitted"), &flows));
        idx.housekeep(&CyclePoint::Integer(2));
        assert!(idx.is_empty());
    }
}
