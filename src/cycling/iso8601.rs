// src/cycling/iso8601.rs

//! Date-time recurrences: `PT6H`, `R1`, `T06`, `2015/P1Y`, `R/+P1D/P2D`,
//! `R2/P1D/$`, `P1D!20200102`.
//!
//! Points of the sequence are `start + n * interval`. Fixed-length intervals
//! are indexed arithmetically; calendar intervals (months, years) start from
//! an estimate and step to the exact index.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta};
use regex::Regex;

use crate::cycling::duration::IsoDuration;
use crate::cycling::point::parse_datetime;
use crate::cycling::RecurrenceParts;
use crate::errors::{CyclerunError, Result};

static TIME_OF_DAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^T(\d{2})(\d{2})?$").expect("time-of-day regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeSequence {
    start: DateTime<FixedOffset>,
    step: Option<IsoDuration>,
    stop: Option<DateTime<FixedOffset>>,
    exclusions: BTreeSet<DateTime<FixedOffset>>,
}

/// Bounds and zone a date-time recurrence is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct DateTimeBounds {
    pub initial: DateTime<FixedOffset>,
    pub final_point: Option<DateTime<FixedOffset>>,
    pub tz: FixedOffset,
}

impl DateTimeSequence {
    pub fn new(
        start: DateTime<FixedOffset>,
        step: Option<IsoDuration>,
        stop: Option<DateTime<FixedOffset>>,
    ) -> Result<Self> {
        if let Some(step) = step {
            if step.is_null() || step.negative {
                return Err(CyclerunError::cycling(format!(
                    "degenerate date-time sequence: interval {step} must be positive"
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

    pub fn parse(expr: &str, bounds: DateTimeBounds) -> Result<Self> {
        let parts = RecurrenceParts::split(expr)?;

        let (start, step, explicit_end) = match (parts.first, parts.second) {
            (None, None) => (bounds.initial, None, None),
            (Some(a), None) if is_interval(a) => (bounds.initial, Some(parse_step(a)?), None),
            (Some(a), None) if TIME_OF_DAY_RE.is_match(a) => {
                let daily = IsoDuration {
                    days: 1,
                    ..IsoDuration::default()
                };
                let step = if parts.reps == Some(1) { None } else { Some(daily) };
                (resolve_point(a, &bounds)?, step, None)
            }
            (Some(a), None) => (resolve_point(a, &bounds)?, None, None),
            (Some(a), Some(b)) if is_interval(a) && !is_interval(b) => {
                let step = parse_step(a)?;
                let end = resolve_point(b, &bounds)?;
                let start = match parts.reps {
                    Some(n) if n > 1 => step
                        .scaled(n - 1)
                        .and_then(|span| span.negated().add_to(end))
                        .ok_or_else(|| {
                            CyclerunError::cycling(format!("recurrence '{expr}' out of range"))
                        })?,
                    Some(_) => end,
                    None => bounds.initial,
                };
                (start, Some(step), Some(end))
            }
            (Some(a), Some(b)) if !is_interval(a) && is_interval(b) => {
                (resolve_point(a, &bounds)?, Some(parse_step(b)?), None)
            }
            _ => {
                return Err(CyclerunError::cycling(format!(
                    "unsupported date-time recurrence '{expr}'"
                )));
            }
        };

        let step = if parts.reps == Some(1) { None } else { step };
        let rep_stop = match (parts.reps, step) {
            (Some(n), Some(s)) if n > 0 => s.scaled(n - 1).and_then(|span| span.add_to(start)),
            _ => None,
        };
        let stop = [explicit_end, rep_stop, bounds.final_point]
            .into_iter()
            .flatten()
            .min();

        let mut seq = Self::new(start, step, stop)?;
        for tok in parts.exclusions {
            seq.exclusions.insert(resolve_point(tok, &bounds)?);
        }
        Ok(seq)
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn step(&self) -> Option<IsoDuration> {
        self.step
    }

    pub fn stop(&self) -> Option<DateTime<FixedOffset>> {
        self.stop
    }

    fn nth(&self, n: u32) -> Option<DateTime<FixedOffset>> {
        match self.step {
            None if n == 0 => Some(self.start),
            None => None,
            Some(step) => step.scaled(n)?.add_to(self.start),
        }
    }

    /// Smallest index whose point is after `p` (`strict`) or at/after it.
    fn first_index(&self, p: DateTime<FixedOffset>, strict: bool) -> Option<u32> {
        let passes = |t: DateTime<FixedOffset>| if strict { t > p } else { t >= p };
        if passes(self.start) {
            return Some(0);
        }
        let step = self.step?;
        let elapsed = (p - self.start).num_seconds();
        let mut n = match step.exact_seconds() {
            Some(secs) if secs > 0 => {
                let whole = elapsed / secs;
                let exact = elapsed % secs == 0;
                match (strict, exact) {
                    (true, _) => whole + 1,
                    (false, true) => whole,
                    (false, false) => whole + 1,
                }
            }
            _ => elapsed / step.approx_seconds().max(1),
        };
        n = n.clamp(0, i64::from(u32::MAX));
        let mut n = n as u32;
        while !passes(self.nth(n)?) {
            n = n.checked_add(1)?;
        }
        while n > 0 && passes(self.nth(n - 1)?) {
            n -= 1;
        }
        Some(n)
    }

    fn within_stop(&self, t: DateTime<FixedOffset>) -> bool {
        self.stop.is_none_or(|e| t <= e)
    }

    pub fn is_valid(&self, p: DateTime<FixedOffset>) -> bool {
        if p < self.start || !self.within_stop(p) || self.exclusions.contains(&p) {
            return false;
        }
        self.first_index(p, false)
            .and_then(|n| self.nth(n))
            .is_some_and(|t| t == p)
    }

    pub fn next_after(&self, p: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let mut n = self.first_index(p, true)?;
        loop {
            let cand = self.nth(n)?;
            if !self.within_stop(cand) {
                return None;
            }
            if !self.exclusions.contains(&cand) {
                return Some(cand);
            }
            n = n.checked_add(1)?;
        }
    }

    pub fn prev_before(&self, p: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        if p <= self.start {
            return None;
        }
        let limit = match self.stop {
            Some(e) if e < p => e + TimeDelta::seconds(1),
            _ => p,
        };
        let mut n = self.first_index(limit, false)?.checked_sub(1)?;
        loop {
            let cand = self.nth(n)?;
            if !self.exclusions.contains(&cand) {
                return Some(cand);
            }
            n = n.checked_sub(1)?;
        }
    }

    pub fn first_from(&self, p: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
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

fn parse_step(tok: &str) -> Result<IsoDuration> {
    let step = IsoDuration::parse(tok)?;
    if step.is_null() {
        return Err(CyclerunError::cycling(format!(
            "degenerate date-time sequence: zero-width interval '{tok}'"
        )));
    }
    Ok(step)
}

fn resolve_point(tok: &str, bounds: &DateTimeBounds) -> Result<DateTime<FixedOffset>> {
    let tok = tok.trim();
    let shift = |base: DateTime<FixedOffset>, rest: &str| -> Result<DateTime<FixedOffset>> {
        if rest.is_empty() {
            return Ok(base);
        }
        IsoDuration::parse(rest)?
            .add_to(base)
            .ok_or_else(|| CyclerunError::cycling(format!("offset '{tok}' out of range")))
    };

    if let Some(rest) = tok.strip_prefix('^') {
        return shift(bounds.initial, rest);
    }
    if let Some(rest) = tok.strip_prefix('$') {
        let fcp = bounds.final_point.ok_or_else(|| {
            CyclerunError::cycling(format!("'{tok}' refers to the final point, which is not set"))
        })?;
        return shift(fcp, rest);
    }
    if tok.starts_with("+P") || tok.starts_with("-P") {
        return shift(bounds.initial, tok);
    }
    if let Some(caps) = TIME_OF_DAY_RE.captures(tok) {
        let hour: u32 = caps[1].parse().unwrap_or(0);
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| CyclerunError::cycling(format!("invalid time of day '{tok}'")))?;
        let same_day = bounds
            .initial
            .with_time(time)
            .single()
            .ok_or_else(|| CyclerunError::cycling(format!("invalid time of day '{tok}'")))?;
        return Ok(if same_day >= bounds.initial {
            same_day
        } else {
            same_day + TimeDelta::days(1)
        });
    }
    parse_datetime(tok, bounds.tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(initial: &str, final_point: Option<&str>) -> DateTimeBounds {
        let tz = FixedOffset::east_opt(0).unwrap();
        DateTimeBounds {
            initial: parse_datetime(initial, tz).unwrap(),
            final_point: final_point.map(|f| parse_datetime(f, tz).unwrap()),
            tz,
        }
    }

    fn dt(s: &str) -> DateTime<FixedOffset> {
        parse_datetime(s, FixedOffset::east_opt(0).unwrap()).unwrap()
    }

    #[test]
    fn yearly_sequence_steps_by_calendar_year() {
        let seq = DateTimeSequence::parse("P1Y", bounds("2015", None)).unwrap();
        assert_eq!(seq.next_after(dt("2015")), Some(dt("2016")));
        assert_eq!(seq.next_after(dt("20150601")), Some(dt("2016")));
        assert_eq!(seq.prev_before(dt("2018")), Some(dt("2017")));
        assert!(seq.is_valid(dt("2030")));
        assert!(!seq.is_valid(dt("20300102")));
    }

    #[test]
    fn hourly_sequence_indexes_arithmetically() {
        let seq = DateTimeSequence::parse("PT6H", bounds("20200101T00", Some("20200102T00"))).unwrap();
        assert_eq!(seq.next_after(dt("20200101T0700")), Some(dt("20200101T12")));
        assert_eq!(seq.first_from(dt("20200101T12")), Some(dt("20200101T12")));
        assert_eq!(seq.next_after(dt("20200102T00")), None);
        assert_eq!(seq.prev_before(dt("20200101T06")), Some(dt("20200101T00")));
    }

    #[test]
    fn time_of_day_start_is_daily() {
        let seq = DateTimeSequence::parse("T06", bounds("20200101T12", None)).unwrap();
        assert_eq!(seq.start(), dt("20200102T06"));
        assert_eq!(seq.next_after(dt("20200102T06")), Some(dt("20200103T06")));
    }

    #[test]
    fn single_shot_and_relative_start() {
        let once = DateTimeSequence::parse("R1", bounds("2020", None)).unwrap();
        assert_eq!(once.next_after(dt("2020")), None);
        let later = DateTimeSequence::parse("+P1D/P2D", bounds("2020", None)).unwrap();
        assert_eq!(later.first_from(dt("2020")), Some(dt("20200102")));
    }

    #[test]
    fn repetitions_ending_at_final_point() {
        let seq = DateTimeSequence::parse("R2/P1D/$", bounds("2020", Some("20200110"))).unwrap();
        assert_eq!(seq.first_from(dt("2020")), Some(dt("20200109")));
        assert_eq!(seq.next_after(dt("20200109")), Some(dt("20200110")));
        assert_eq!(seq.next_after(dt("20200110")), None);
    }

    #[test]
    fn exclusions_and_degenerate_intervals() {
        let seq = DateTimeSequence::parse("P1D!20200102", bounds("2020", None)).unwrap();
        assert_eq!(seq.next_after(dt("20200101")), Some(dt("20200103")));
        assert!(DateTimeSequence::parse("PT0H", bounds("2020", None)).is_err());
    }

    #[test]
    fn monthly_sequence_uses_estimate_then_exact_steps() {
        let seq = DateTimeSequence::parse("P1M", bounds("20200131", None)).unwrap();
        assert_eq!(seq.next_after(dt("20200131")), Some(dt("20200229")));
        assert_eq!(seq.next_after(dt("20221001")), Some(dt("20221031")));
    }
}
