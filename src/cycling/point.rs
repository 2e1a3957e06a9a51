// src/cycling/point.rs

//! Cycle points and the intervals between them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Timelike};
use regex::Regex;

use crate::cycling::duration::IsoDuration;
use crate::errors::{CyclerunError, Result};

static DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-?(\d{2})(?:-?(\d{2})(?:T(\d{2})(?::?(\d{2})(?::?(\d{2}))?)?)?)?)?(Z|[+-]\d{2}(?::?\d{2})?)?$",
    )
    .expect("date-time regex is valid")
});

/// A position in the workflow's cycling space.
///
/// Integer and date-time points never mix within one workflow; the ordering
/// between the two variants only exists so that the type is totally ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CyclePoint {
    Integer(i64),
    DateTime(DateTime<FixedOffset>),
}

impl Ord for CyclePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (CyclePoint::Integer(a), CyclePoint::Integer(b)) => a.cmp(b),
            (CyclePoint::DateTime(a), CyclePoint::DateTime(b)) => a.cmp(b),
            (CyclePoint::Integer(_), CyclePoint::DateTime(_)) => Ordering::Less,
            (CyclePoint::DateTime(_), CyclePoint::Integer(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for CyclePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl CyclePoint {
    /// `self + interval`, or `None` on overflow or mismatched kinds.
    pub fn add(&self, interval: &Interval) -> Option<CyclePoint> {
        match (self, interval) {
            (CyclePoint::Integer(p), Interval::Integer(i)) => p.checked_add(*i).map(CyclePoint::Integer),
            (CyclePoint::DateTime(p), Interval::Duration(d)) => d.add_to(*p).map(CyclePoint::DateTime),
            _ => None,
        }
    }

    pub fn sub(&self, interval: &Interval) -> Option<CyclePoint> {
        self.add(&interval.negated())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CyclePoint::Integer(p) => Some(*p),
            CyclePoint::DateTime(_) => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            CyclePoint::DateTime(dt) => Some(*dt),
            CyclePoint::Integer(_) => None,
        }
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePoint::Integer(p) => write!(f, "{p}"),
            CyclePoint::DateTime(dt) => {
                if dt.second() == 0 {
                    write!(f, "{}", dt.format("%Y%m%dT%H%M"))?;
                } else {
                    write!(f, "{}", dt.format("%Y%m%dT%H%M%S"))?;
                }
                if dt.offset().local_minus_utc() == 0 {
                    f.write_str("Z")
                } else {
                    write!(f, "{}", dt.format("%z"))
                }
            }
        }
    }
}

/// Distance between cycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Integer(i64),
    Duration(IsoDuration),
}

impl Interval {
    pub fn is_null(&self) -> bool {
        match self {
            Interval::Integer(i) => *i == 0,
            Interval::Duration(d) => d.is_null(),
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Interval::Integer(i) => *i < 0,
            Interval::Duration(d) => d.negative && !d.is_null(),
        }
    }

    pub fn negated(&self) -> Interval {
        match self {
            Interval::Integer(i) => Interval::Integer(-i),
            Interval::Duration(d) => Interval::Duration(d.negated()),
        }
    }

    /// Rough ordering key used to compare offsets of the same kind.
    pub fn magnitude_hint(&self) -> i64 {
        match self {
            Interval::Integer(i) => *i,
            Interval::Duration(d) => d.approx_seconds(),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Integer(i) if *i < 0 => write!(f, "-P{}", i.unsigned_abs()),
            Interval::Integer(i) => write!(f, "P{i}"),
            Interval::Duration(d) => write!(f, "{d}"),
        }
    }
}

/// Parse an integer interval: `P2`, `+P2`, `-P1`.
pub fn parse_integer_interval(s: &str) -> Result<i64> {
    let s = s.trim();
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let digits = rest
        .strip_prefix('P')
        .ok_or_else(|| CyclerunError::cycling(format!("invalid integer interval '{s}'")))?;
    let value: i64 = digits
        .parse()
        .map_err(|_| CyclerunError::cycling(format!("invalid integer interval '{s}'")))?;
    Ok(sign * value)
}

/// Parse a (possibly truncated) ISO 8601 date-time and normalise it to `tz`.
///
/// Missing trailing fields default to their minimum; a missing offset means
/// the point is already in `tz`.
pub fn parse_datetime(s: &str, tz: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let s = s.trim();
    let caps = DATETIME_RE
        .captures(s)
        .ok_or_else(|| CyclerunError::cycling(format!("invalid date-time cycle point '{s}'")))?;
    let num = |i: usize, default: u32| -> u32 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(default)
    };
    let year: i32 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| CyclerunError::cycling(format!("invalid year in '{s}'")))?;

    let naive = NaiveDate::from_ymd_opt(year, num(2, 1), num(3, 1))
        .and_then(|d| d.and_hms_opt(num(4, 0), num(5, 0), num(6, 0)))
        .ok_or_else(|| CyclerunError::cycling(format!("out-of-range date-time '{s}'")))?;

    let source_tz = match caps.get(7) {
        Some(m) => parse_utc_offset(m.as_str())?,
        None => tz,
    };
    let local = source_tz
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| CyclerunError::cycling(format!("ambiguous date-time '{s}'")))?;
    Ok(local.with_timezone(&tz))
}

/// Parse `Z`, `+05`, `+0530`, `-05:30`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.is_empty() {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| CyclerunError::cycling("invalid UTC offset"));
    }
    let invalid = || CyclerunError::cycling(format!("invalid UTC offset '{s}'"));
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let (hh, mm) = match digits.len() {
        2 => (digits.as_str(), "0"),
        4 => digits.split_at(2),
        _ => return Err(invalid()),
    };
    let hours: i32 = hh.parse().map_err(|_| invalid())?;
    let minutes: i32 = mm.parse().map_err(|_| invalid())?;
    FixedOffset::east_opt(sign * (hours * 3_600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn parses_truncated_and_extended_forms() {
        let a = parse_datetime("2015", utc()).unwrap();
        let b = parse_datetime("2015-01-01T00:00Z", utc()).unwrap();
        let c = parse_datetime("20150101T0000Z", utc()).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn normalises_offsets_to_workflow_zone() {
        let p = parse_datetime("20150101T0530+0530", utc()).unwrap();
        assert_eq!(CyclePoint::DateTime(p).to_string(), "20150101T0000Z");
    }

    #[test]
    fn display_round_trips() {
        let tz = parse_utc_offset("+05:30").unwrap();
        let p = CyclePoint::DateTime(parse_datetime("20200229T1200", tz).unwrap());
        let again = parse_datetime(&p.to_string(), tz).unwrap();
        assert_eq!(p, CyclePoint::DateTime(again));
    }

    #[test]
    fn integer_arithmetic_and_ordering() {
        let p = CyclePoint::Integer(5);
        assert_eq!(p.add(&Interval::Integer(-2)), Some(CyclePoint::Integer(3)));
        assert!(CyclePoint::Integer(2) < CyclePoint::Integer(10));
        assert_eq!(p.add(&Interval::Duration(IsoDuration::default())), None);
    }

    #[test]
    fn parses_integer_intervals() {
        assert_eq!(parse_integer_interval("P3").unwrap(), 3);
        assert_eq!(parse_integer_interval("-P1").unwrap(), -1);
        assert_eq!(parse_integer_interval("+P2").unwrap(), 2);
        assert!(parse_integer_interval("3").is_err());
    }
}
