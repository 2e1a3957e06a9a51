// src/pool/queue.rs

//! Internal queues limiting how many tasks of a group are active at once.
//!
//! Each queue releases its members FIFO by `(cycle point, declaration
//! order)`, never exceeding its limit of active (preparing, submitted,
//! running) members.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::config::model::{DEFAULT_QUEUE, QueueDef};
use crate::cycling::CyclePoint;
use crate::pool::ProxyKey;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    point: CyclePoint,
    decl_index: usize,
    key: ProxyKey,
}

#[derive(Debug, Clone)]
struct Limiter {
    name: String,
    /// 0 means unlimited.
    limit: usize,
    waiting: BTreeSet<Entry>,
}

#[derive(Debug, Clone)]
pub struct TaskQueues {
    limiters: Vec<Limiter>,
    by_name: HashMap<String, usize>,
    member_of: HashMap<ProxyKey, usize>,
}

impl TaskQueues {
    pub fn new(defs: &[QueueDef]) -> Self {
        let mut limiters: Vec<Limiter> = defs
            .iter()
            .map(|q| Limiter {
                name: q.name.clone(),
                limit: q.limit,
                waiting: BTreeSet::new(),
            })
            .collect();
        if !limiters.iter().any(|l| l.name == DEFAULT_QUEUE) {
            limiters.insert(
                0,
                Limiter {
                    name: DEFAULT_QUEUE.to_string(),
                    limit: 0,
                    waiting: BTreeSet::new(),
                },
            );
        }
        let by_name = limiters
            .iter()
            .enumerate()
            .map(|(i, l)| (l.name.clone(), i))
            .collect();
        Self {
            limiters,
            by_name,
            member_of: HashMap::new(),
        }
    }

    fn index_of(&self, queue: &str) -> usize {
        self.by_name
            .get(queue)
            .or_else(|| self.by_name.get(DEFAULT_QUEUE))
            .copied()
            .unwrap_or(0)
    }

    pub fn push(&mut self, key: ProxyKey, queue: &str, point: CyclePoint, decl_index: usize) {
        let idx = self.index_of(queue);
        self.remove(key);
        if let Some(limiter) = self.limiters.get_mut(idx) {
            limiter.waiting.insert(Entry {
                point,
                decl_index,
                key,
            });
            self.member_of.insert(key, idx);
        }
    }

    pub fn remove(&mut self, key: ProxyKey) -> bool {
        let Some(idx) = self.member_of.remove(&key) else {
            return false;
        };
        if let Some(limiter) = self.limiters.get_mut(idx) {
            limiter.waiting.retain(|e| e.key != key);
        }
        true
    }

    pub fn contains(&self, key: ProxyKey) -> bool {
        self.member_of.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.member_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_of.is_empty()
    }

    /// Release up to each queue's free capacity. `active` counts active
    /// proxies per queue name. Returned in `(point, declaration)` order.
    pub fn release(&mut self, active: &HashMap<String, usize>) -> Vec<ProxyKey> {
        let mut released: Vec<Entry> = Vec::new();
        for limiter in self.limiters.iter_mut() {
            let running = active.get(&limiter.name).copied().unwrap_or(0);
            let free = if limiter.limit == 0 {
                usize::MAX
            } else {
                limiter.limit.saturating_sub(running)
            };
            let take: Vec<Entry> = limiter.waiting.iter().take(free).cloned().collect();
            for entry in &take {
                limiter.waiting.remove(entry);
            }
            if !take.is_empty() {
                debug!(queue = %limiter.name, count = take.len(), "releasing queued tasks");
            }
            released.extend(take);
        }
        for entry in &released {
            self.member_of.remove(&entry.key);
        }
        released.sort();
        released.into_iter().map(|e| e.key).collect()
    }

    /// Rebuild limiters from new definitions, keeping queued entries.
    /// `queue_of` maps a queued proxy to its (possibly new) queue name.
    pub fn reconfigure(&mut self, defs: &[QueueDef], queue_of: impl Fn(ProxyKey) -> Option<String>) {
        let old: Vec<Entry> = self
            .limiters
            .iter()
            .flat_map(|l| l.waiting.iter().cloned())
            .collect();
        *self = TaskQueues::new(defs);
        for entry in old {
            if let Some(queue) = queue_of(entry.key) {
                self.push(entry.key, &queue, entry.point, entry.decl_index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues() -> TaskQueues {
        TaskQueues::new(&[
            QueueDef {
                name: DEFAULT_QUEUE.to_string(),
                limit: 0,
                members: vec![],
            },
            QueueDef {
                name: "big".to_string(),
                limit: 2,
                members: vec![],
            },
        ])
    }

    #[test]
    fn releases_fifo_by_point_then_declaration() {
        let mut q = queues();
        q.push(ProxyKey(1), "big", CyclePoint::Integer(2), 0);
        q.push(ProxyKey(2), "big", CyclePoint::Integer(1), 5);
        q.push(ProxyKey(3), "big", CyclePoint::Integer(1), 1);
        let released = q.release(&HashMap::new());
        assert_eq!(released, vec![ProxyKey(3), ProxyKey(2)]);
        assert!(q.contains(ProxyKey(1)));
    }

    #[test]
    fn respects_active_counts() {
        let mut q = queues();
        q.push(ProxyKey(1), "big", CyclePoint::Integer(1), 0);
        let active = HashMap::from([("big".to_string(), 2)]);
        assert!(q.release(&active).is_empty());
        let active = HashMap::from([("big".to_string(), 1)]);
        assert_eq!(q.release(&active), vec![ProxyKey(1)]);
    }

    #[test]
    fn unlimited_default_queue_and_unknown_names() {
        let mut q = queues();
        for i in 0..10 {
            q.push(ProxyKey(i), "nonexistent", CyclePoint::Integer(1), i as usize);
        }
        assert_eq!(q.release(&HashMap::new()).len(), 10);
        assert!(q.is_empty());
    }

    #[test]
    fn reconfigure_keeps_queued_entries() {
        let mut q = queues();
        q.push(ProxyKey(1), "big", CyclePoint::Integer(1), 0);
        q.reconfigure(
            &[QueueDef {
                name: "small".to_string(),
                limit: 1,
                members: vec![],
            }],
            |_| Some("small".to_string()),
        );
        assert!(q.contains(ProxyKey(1)));
        let active = HashMap::from([("small".to_string(), 1)]);
        assert!(q.release(&active).is_empty());
    }
}
