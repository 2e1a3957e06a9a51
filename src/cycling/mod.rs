// src/cycling/mod.rs

//! Cycling engine: cycle points, intervals and recurrence sequences.
//!
//! Everything here is pure. A [`CyclingContext`] carries the workflow's
//! cycling mode, initial/final points and time zone, and parses the strings
//! that appear in configuration (points, offsets, recurrences) into typed
//! values. A [`Sequence`] answers "which points does this recurrence fire
//! at", bounded by the workflow's initial and final points.

pub mod duration;
pub mod integer;
pub mod iso8601;
pub mod point;

use chrono::FixedOffset;

use crate::errors::{CyclerunError, Result};
use crate::types::CyclingMode;

pub use duration::{IsoDuration, parse_duration_list};
pub use integer::IntegerSequence;
pub use iso8601::{DateTimeBounds, DateTimeSequence};
pub use point::{CyclePoint, Interval};

/// A recurrence expression split into its `R<n>/a/b!x` pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecurrenceParts<'a> {
    /// `Some(n)` for `R<n>`; `None` for `R` or no repetition prefix.
    pub reps: Option<u32>,
    pub first: Option<&'a str>,
    pub second: Option<&'a str>,
    pub exclusions: Vec<&'a str>,
}

impl<'a> RecurrenceParts<'a> {
    pub fn split(expr: &'a str) -> Result<Self> {
        let expr = expr.trim();
        let (main, excl) = match expr.split_once('!') {
            Some((main, excl)) => (main.trim(), Some(excl.trim())),
            None => (expr, None),
        };

        let exclusions = match excl {
            None => Vec::new(),
            Some(e) => {
                let inner = e
                    .strip_prefix('(')
                    .and_then(|e| e.strip_suffix(')'))
                    .unwrap_or(e);
                inner
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            }
        };

        let mut tokens: Vec<&str> = main.split('/').map(str::trim).collect();
        let mut reps = None;
        if let Some(rest) = tokens.first().and_then(|t| t.strip_prefix('R')) {
            if rest.chars().all(|c| c.is_ascii_digit()) {
                if !rest.is_empty() {
                    reps = Some(rest.parse::<u32>().map_err(|_| {
                        CyclerunError::cycling(format!("invalid repetition count in '{expr}'"))
                    })?);
                }
                tokens.remove(0);
            }
        }

        if tokens.len() > 2 || tokens.iter().any(|t| t.is_empty()) {
            return Err(CyclerunError::cycling(format!(
                "unsupported recurrence '{expr}'"
            )));
        }
        if reps == Some(0) {
            return Err(CyclerunError::cycling(format!(
                "degenerate recurrence '{expr}': zero repetitions"
            )));
        }

        Ok(Self {
            reps,
            first: tokens.first().copied(),
            second: tokens.get(1).copied(),
            exclusions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SequenceKind {
    Integer(IntegerSequence),
    DateTime(DateTimeSequence),
}

/// A recurrence bound to the workflow's initial and final points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    expr: String,
    kind: SequenceKind,
    initial: CyclePoint,
    final_point: Option<CyclePoint>,
}

impl Sequence {
    pub fn expr(&self) -> &str {
        &self.expr
    }

    fn in_bounds(&self, p: &CyclePoint) -> bool {
        *p >= self.initial && self.final_point.as_ref().is_none_or(|f| p <= f)
    }

    fn raw_next(&self, p: &CyclePoint) -> Option<CyclePoint> {
        match (&self.kind, p) {
            (SequenceKind::Integer(s), CyclePoint::Integer(p)) => {
                s.next_after(*p).map(CyclePoint::Integer)
            }
            (SequenceKind::DateTime(s), CyclePoint::DateTime(p)) => {
                s.next_after(*p).map(CyclePoint::DateTime)
            }
            _ => None,
        }
    }

    fn raw_first(&self, p: &CyclePoint) -> Option<CyclePoint> {
        match (&self.kind, p) {
            (SequenceKind::Integer(s), CyclePoint::Integer(p)) => {
                s.first_from(*p).map(CyclePoint::Integer)
            }
            (SequenceKind::DateTime(s), CyclePoint::DateTime(p)) => {
                s.first_from(*p).map(CyclePoint::DateTime)
            }
            _ => None,
        }
    }

    pub fn is_valid(&self, p: &CyclePoint) -> bool {
        if !self.in_bounds(p) {
            return false;
        }
        match (&self.kind, p) {
            (SequenceKind::Integer(s), CyclePoint::Integer(p)) => s.is_valid(*p),
            (SequenceKind::DateTime(s), CyclePoint::DateTime(p)) => s.is_valid(*p),
            _ => false,
        }
    }

    /// Next point strictly after `p`, or `None` past the final point.
    pub fn get_next_point(&self, p: &CyclePoint) -> Option<CyclePoint> {
        let next = if *p < self.initial {
            self.raw_first(&self.initial)?
        } else {
            self.raw_next(p)?
        };
        self.in_bounds(&next).then_some(next)
    }

    /// Previous point strictly before `p`, or `None` before the initial point.
    pub fn get_prev_point(&self, p: &CyclePoint) -> Option<CyclePoint> {
        let prev = match (&self.kind, p) {
            (SequenceKind::Integer(s), CyclePoint::Integer(p)) => {
                s.prev_before(*p).map(CyclePoint::Integer)
            }
            (SequenceKind::DateTime(s), CyclePoint::DateTime(p)) => {
                s.prev_before(*p).map(CyclePoint::DateTime)
            }
            _ => None,
        }?;
        self.in_bounds(&prev).then_some(prev)
    }

    /// First point at or after `p`.
    pub fn get_first_point(&self, p: &CyclePoint) -> Option<CyclePoint> {
        let from = if *p < self.initial { &self.initial } else { p };
        let first = self.raw_first(from)?;
        self.in_bounds(&first).then_some(first)
    }

    /// True when the recurrence never fires inside `[initial, final]`.
    pub fn is_out_of_bounds(&self) -> bool {
        self.get_first_point(&self.initial).is_none()
    }

    pub fn step(&self) -> Option<Interval> {
        match &self.kind {
            SequenceKind::Integer(s) => s.step().map(Interval::Integer),
            SequenceKind::DateTime(s) => s.step().map(Interval::Duration),
        }
    }
}

/// Cycling settings shared by everything that parses or compares points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclingContext {
    pub mode: CyclingMode,
    pub initial: CyclePoint,
    pub final_point: Option<CyclePoint>,
    pub tz: FixedOffset,
}

impl CyclingContext {
    pub fn new(
        mode: CyclingMode,
        initial: &str,
        final_point: Option<&str>,
        tz: FixedOffset,
    ) -> Result<Self> {
        let mut ctx = Self {
            mode,
            initial: CyclePoint::Integer(0),
            final_point: None,
            tz,
        };
        ctx.initial = ctx.parse_point(initial)?;
        ctx.final_point = final_point.map(|f| ctx.parse_point(f)).transpose()?;
        if let Some(fcp) = &ctx.final_point {
            if *fcp < ctx.initial {
                return Err(CyclerunError::config(format!(
                    "final cycle point {fcp} is before initial cycle point {}",
                    ctx.initial
                )));
            }
        }
        Ok(ctx)
    }

    pub fn parse_point(&self, s: &str) -> Result<CyclePoint> {
        let s = s.trim();
        match self.mode {
            CyclingMode::Integer => s
                .parse::<i64>()
                .map(CyclePoint::Integer)
                .map_err(|_| CyclerunError::cycling(format!("invalid integer cycle point '{s}'"))),
            CyclingMode::DateTime => point::parse_datetime(s, self.tz).map(CyclePoint::DateTime),
        }
    }

    /// Parse a signed offset such as `-P1`, `+PT6H` or `P1Y`.
    pub fn parse_interval(&self, s: &str) -> Result<Interval> {
        match self.mode {
            CyclingMode::Integer => point::parse_integer_interval(s).map(Interval::Integer),
            CyclingMode::DateTime => IsoDuration::parse(s).map(Interval::Duration),
        }
    }

    pub fn parse_sequence(&self, expr: &str) -> Result<Sequence> {
        let kind = match (&self.initial, &self.final_point) {
            (CyclePoint::Integer(icp), fcp) => {
                let fcp = fcp.as_ref().and_then(CyclePoint::as_integer);
                SequenceKind::Integer(IntegerSequence::parse(expr, *icp, fcp)?)
            }
            (CyclePoint::DateTime(icp), fcp) => {
                let bounds = DateTimeBounds {
                    initial: *icp,
                    final_point: fcp.as_ref().and_then(CyclePoint::as_datetime),
                    tz: self.tz,
                };
                SequenceKind::DateTime(DateTimeSequence::parse(expr, bounds)?)
            }
        };
        Ok(Sequence {
            expr: expr.trim().to_string(),
            kind,
            initial: self.initial.clone(),
            final_point: self.final_point.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_ctx(icp: &str, fcp: Option<&str>) -> CyclingContext {
        CyclingContext::new(CyclingMode::Integer, icp, fcp, FixedOffset::east_opt(0).unwrap())
            .unwrap()
    }

    #[test]
    fn splits_recurrence_pieces() {
        let parts = RecurrenceParts::split("R3/2/P2!(4, 6)").unwrap();
        assert_eq!(parts.reps, Some(3));
        assert_eq!(parts.first, Some("2"));
        assert_eq!(parts.second, Some("P2"));
        assert_eq!(parts.exclusions, vec!["4", "6"]);
        assert!(RecurrenceParts::split("R1//5").is_err());
        assert!(RecurrenceParts::split("R0/P1").is_err());
    }

    #[test]
    fn sequence_is_bounded_by_workflow_points() {
        let ctx = int_ctx("3", Some("7"));
        let seq = ctx.parse_sequence("R/1/P2").unwrap();
        assert_eq!(seq.get_first_point(&CyclePoint::Integer(0)), Some(CyclePoint::Integer(3)));
        assert_eq!(seq.get_prev_point(&CyclePoint::Integer(3)), None);
        assert_eq!(seq.get_next_point(&CyclePoint::Integer(7)), None);
        assert!(!seq.is_valid(&CyclePoint::Integer(1)));
    }

    #[test]
    fn detects_out_of_bounds_recurrences() {
        let ctx = int_ctx("1", Some("5"));
        assert!(ctx.parse_sequence("R1/10").unwrap().is_out_of_bounds());
        assert!(!ctx.parse_sequence("P1").unwrap().is_out_of_bounds());
    }

    #[test]
    fn final_before_initial_is_a_config_error() {
        let err = CyclingContext::new(
            CyclingMode::Integer,
            "5",
            Some("1"),
            FixedOffset::east_opt(0).unwrap(),
        );
        assert!(matches!(err, Err(CyclerunError::ConfigError(_))));
    }
}
