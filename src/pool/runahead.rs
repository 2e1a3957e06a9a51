// src/pool/runahead.rs

//! Runahead limiting.
//!
//! The limit point is computed from the oldest point that still has work
//! left (a proxy that is not both final and complete). Proxies beyond it keep
//! their `is_runahead` flag and are never considered for queueing.

use tracing::debug;

use crate::config::model::RunaheadLimit;
use crate::cycling::CyclePoint;
use crate::pool::{Pool, ProxyKey};
use crate::task::TaskStatus;

/// Upper bound on release passes per call; each pass can only spawn
/// instances further ahead, so this is never reached in practice.
const MAX_RELEASE_PASSES: usize = 10_000;

impl Pool {
    /// Oldest point with unfinished work, or the oldest point overall when
    /// everything in the pool is finished.
    pub fn runahead_base(&self) -> Option<CyclePoint> {
        self.proxies
            .values()
            .filter(|p| !(p.is_final() && p.is_complete()))
            .map(|p| p.id.point.clone())
            .min()
            .or_else(|| self.min_point())
    }

    /// Next point after `point` on any sequence of any task.
    fn next_graph_point(&self, point: &CyclePoint) -> Option<CyclePoint> {
        self.defs
            .iter()
            .flat_map(|d| d.sections.iter())
            .filter_map(|s| s.sequence.get_next_point(point))
            .min()
    }

    /// Recompute the runahead limit point.
    pub fn compute_runahead_limit(&mut self) -> Option<CyclePoint> {
        let Some(base) = self.runahead_base() else {
            self.runahead_limit_point = None;
            return None;
        };
        let mut limit = match &self.runahead {
            RunaheadLimit::Points(n) => {
                let mut point = base.clone();
                for _ in 1..*n {
                    match self.next_graph_point(&point) {
                        Some(next) => point = next,
                        None => break,
                    }
                }
                point
            }
            RunaheadLimit::Span(interval) => base.add(interval).unwrap_or_else(|| base.clone()),
        };
        if let Some(offset) = self.defs.max_future_offset() {
            if let Some(extended) = limit.add(offset) {
                limit = extended;
            }
        }
        if let Some(stop) = &self.stop_point {
            if limit > *stop {
                limit = stop.clone();
            }
        }
        if self.runahead_limit_point.as_ref() != Some(&limit) {
            debug!(base = %base, limit = %limit, "runahead limit");
        }
        self.runahead_limit_point = Some(limit.clone());
        Some(limit)
    }

    /// Release proxies within the runahead limit, spawning the next
    /// instance of each parentless sequence as its predecessor is released,
    /// and re-flag waiting proxies that fell beyond a shrunken limit.
    pub fn release_runahead(&mut self) -> Vec<ProxyKey> {
        let mut released = Vec::new();
        for _ in 0..MAX_RELEASE_PASSES {
            let Some(limit) = self.compute_runahead_limit() else {
                break;
            };
            let ready: Vec<ProxyKey> = self
                .proxies
                .iter()
                .filter(|(_, p)| p.is_runahead && p.id.point <= limit)
                .map(|(k, _)| *k)
                .collect();
            if ready.is_empty() {
                break;
            }
            for key in ready {
                if let Some(p) = self.proxies.get_mut(&key) {
                    p.is_runahead = false;
                    self.dirty.insert(key);
                }
                released.push(key);
                self.spawn_next_parentless(key);
            }
        }
        self.reflag_beyond_limit();
        released
    }

    fn reflag_beyond_limit(&mut self) {
        let Some(limit) = self.runahead_limit_point.clone() else {
            return;
        };
        let beyond: Vec<ProxyKey> = self
            .proxies
            .iter()
            .filter(|(_, p)| {
                !p.is_runahead
                    && p.status() == TaskStatus::Waiting
                    && !p.is_manual_submit
                    && p.id.point > limit
            })
            .map(|(k, _)| *k)
            .collect();
        for key in beyond {
            if let Some(p) = self.proxies.get_mut(&key) {
                debug!(task = %p.id, limit = %limit, "back under runahead limit");
                p.is_runahead = true;
                if p.is_queued {
                    p.is_queued = false;
                    self.queues.remove(key);
                }
                self.dirty.insert(key);
            }
        }
    }
}
