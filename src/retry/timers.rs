// src/retry/timers.rs

//! Retry timers as a min-heap of fire times.
//!
//! Entries are never removed eagerly. When a timer pops, the caller checks
//! it against the proxy's current `retry` field and drops stale ones.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::cycling::IsoDuration;
use crate::pool::ProxyKey;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scheduled {
    fire_at: DateTime<Utc>,
    key: ProxyKey,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that BinaryHeap pops the earliest time first.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct RetryTimers {
    heap: BinaryHeap<Scheduled>,
}

impl RetryTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, key: ProxyKey, fire_at: DateTime<Utc>) {
        self.heap.push(Scheduled { fire_at, key });
    }

    /// Pop every timer due at `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<(ProxyKey, DateTime<Utc>)> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.fire_at > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                due.push((entry.key, entry.fire_at));
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|e| e.fire_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Delay before try `try_num + 1`, or `None` once retries are used up.
///
/// With N delays a task is retried at most N times.
pub fn retry_delay(delays: &[IsoDuration], try_num: u32) -> Option<IsoDuration> {
    let idx = usize::try_from(try_num).ok()?.checked_sub(1)?;
    delays.get(idx).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn pops_in_time_order() {
        let t0 = Utc::now();
        let mut timers = RetryTimers::new();
        timers.arm(ProxyKey(2), t0 + TimeDelta::seconds(5));
        timers.arm(ProxyKey(1), t0 + TimeDelta::seconds(1));
        timers.arm(ProxyKey(3), t0 + TimeDelta::seconds(9));
        assert_eq!(timers.next_due(), Some(t0 + TimeDelta::seconds(1)));

        let due = timers.pop_due(t0 + TimeDelta::seconds(5));
        let keys: Vec<ProxyKey> = due.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![ProxyKey(1), ProxyKey(2)]);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn retry_delays_are_bounded() {
        let delays = vec![IsoDuration::from_seconds(1); 3];
        assert!(retry_delay(&delays, 1).is_some());
        assert!(retry_delay(&delays, 3).is_some());
        assert!(retry_delay(&delays, 4).is_none());
        assert!(retry_delay(&[], 1).is_none());
        assert!(retry_delay(&delays, 0).is_none());
    }
}
