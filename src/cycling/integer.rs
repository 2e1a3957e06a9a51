// src/cycling/integer.rs

//! Integer recurrences: `R1`, `P2`, `R3/5/P2`, `+P1/P3`, `P1!(3, 5)`.

use std::collections::BTreeSet;

use crate::cycling::point::parse_integer_interval;
use crate::cycling::RecurrenceParts;
use crate::errors::{CyclerunError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerSequence {
    start: i64,
    /// `None` for a single-shot recurrence.
    step: Option<i64>,
    stop: Option<i64>,
    exclusions: BTreeSet<i64>,
}

impl IntegerSequence {
    pub fn new(start: i64, step: Option<i64>, stop: Option<i64>) -> Result<Self> {
        if let Some(s) = step {
            if s <= 0 {
                return Err(CyclerunError::cycling(format!(
                    "degenerate integer sequence: interval P{s} must be positive"
                )));
            }
        }
        Ok(Self {
            start,
            step,
            stop,
            exclusions: BTreeSet::new(),
        })
    }

    pub fn parse(expr: &str, initial: i64, final_point: Option<i64>) -> Result<Self> {
        let parts = RecurrenceParts::split(expr)?;
        let point = |tok: &str| resolve_point(tok, initial, final_point);

        let (start, step, explicit_end) = match (parts.first, parts.second) {
            (None, None) => (initial, None, None),
            (Some(a), None) if is_interval(a) => (initial, Some(parse_step(a)?), None),
            (Some(a), None) => (point(a)?, None, None),
            (Some(a), Some(b)) if is_interval(a) && !is_interval(b) => {
                let step = parse_step(a)?;
                let end = point(b)?;
                let start = match parts.reps {
                    Some(n) if n > 0 => step
                        .checked_mul(i64::from(n) - 1)
                        .and_then(|span| end.checked_sub(span))
                        .ok_or_else(|| out_of_range(expr))?,
                    _ => initial,
                };
                (start, Some(step), Some(end))
            }
            (Some(a), Some(b)) if !is_interval(a) && is_interval(b) => {
                (point(a)?, Some(parse_step(b)?), None)
            }
            _ => {
                return Err(CyclerunError::cycling(format!(
                    "unsupported integer recurrence '{expr}'"
                )));
            }
        };

        // `R1` with an interval still fires once.
        let step = if parts.reps == Some(1) { None } else { step };
        let rep_stop = match (parts.reps, step) {
            (Some(n), Some(s)) if n > 0 => Some(
                s.checked_mul(i64::from(n) - 1)
                    .and_then(|span| start.checked_add(span))
                    .ok_or_else(|| out_of_range(expr))?,
            ),
            _ => None,
        };
        let stop = [explicit_end, rep_stop, final_point]
            .into_iter()
            .flatten()
            .min();

        let mut seq = Self::new(start, step, stop)?;
        for tok in parts.exclusions {
            seq.exclusions.insert(point(tok)?);
        }
        Ok(seq)
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn step(&self) -> Option<i64> {
        self.step
    }

    pub fn stop(&self) -> Option<i64> {
        self.stop
    }

    fn on_grid(&self, p: i64) -> bool {
        if p < self.start || self.stop.is_some_and(|e| p > e) {
            return false;
        }
        match self.step {
            None => p == self.start,
            Some(s) => (p - self.start) % s == 0,
        }
    }

    pub fn is_valid(&self, p: i64) -> bool {
        self.on_grid(p) && !self.exclusions.contains(&p)
    }

    /// First valid point strictly after `p`.
    pub fn next_after(&self, p: i64) -> Option<i64> {
        let mut cand = if p < self.start {
            self.start
        } else {
            let s = self.step?;
            self.start.checked_add(((p - self.start) / s + 1).checked_mul(s)?)?
        };
        loop {
            if self.stop.is_some_and(|e| cand > e) {
                return None;
            }
            if !self.exclusions.contains(&cand) {
                return Some(cand);
            }
            cand = cand.checked_add(self.step?)?;
        }
    }

    /// Last valid point strictly before `p`.
    pub fn prev_before(&self, p: i64) -> Option<i64> {
        if p <= self.start {
            return None;
        }
        let mut cand = match self.step {
            None => self.start,
            Some(s) => {
                let limit = match self.stop {
                    Some(e) => (p - 1).min(e),
                    None => p - 1,
                };
                if limit < self.start {
                    return None;
                }
                self.start + ((limit - self.start) / s) * s
            }
        };
        loop {
            if cand < self.start || self.stop.is_some_and(|e| cand > e) {
                return None;
            }
            if !self.exclusions.contains(&cand) {
                return Some(cand);
            }
            cand = cand.checked_sub(self.step?)?;
        }
    }

    /// First valid point at or after `p`.
    pub fn first_from(&self, p: i64) -> Option<i64> {
        if self.is_valid(p) {
            Some(p)
        } else {
            self.next_after(p)
        }
    }
}

fn is_interval(tok: &str) -> bool {
    tok.starts_with('P')
}

fn parse_step(tok: &str) -> Result<i64> {
    let step = parse_integer_interval(tok)?;
    if step <= 0 {
        return Err(CyclerunError::cycling(format!(
            "degenerate integer sequence: zero-width interval '{tok}'"
        )));
    }
    Ok(step)
}

fn resolve_point(tok: &str, initial: i64, final_point: Option<i64>) -> Result<i64> {
    let tok = tok.trim();
    let final_required = || {
        final_point.ok_or_else(|| {
            CyclerunError::cycling(format!("'{tok}' refers to the final point, which is not set"))
        })
    };
    let shifted = |base: i64, offset: i64| {
        base.checked_add(offset)
            .ok_or_else(|| CyclerunError::cycling(format!("cycle point '{tok}' out of range")))
    };
    if let Some(rest) = tok.strip_prefix('^') {
        return shifted(initial, offset_or_zero(rest)?);
    }
    if let Some(rest) = tok.strip_prefix('$') {
        return shifted(final_required()?, offset_or_zero(rest)?);
    }
    if tok.starts_with("+P") || tok.starts_with("-P") {
        return shifted(initial, parse_integer_interval(tok)?);
    }
    tok.parse::<i64>()
        .map_err(|_| CyclerunError::cycling(format!("invalid integer cycle point '{tok}'")))
}

fn offset_or_zero(s: &str) -> Result<i64> {
    if s.is_empty() {
        Ok(0)
    } else {
        parse_integer_interval(s)
    }
}

fn out_of_range(expr: &str) -> CyclerunError {
    CyclerunError::cycling(format!("recurrence '{expr}' out of range"))
}
