// src/cycling/duration.rs

//! ISO 8601 durations (`P1Y2M`, `PT6H`, `P2W`, `-P1D`).
//!
//! Calendar units (years, months) are kept separate from exact units so that
//! `P1M` added to 31 January lands at the end of February rather than drifting
//! by a fixed number of seconds.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Months, TimeDelta};
use regex::Regex;

use crate::errors::{CyclerunError, Result};

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([+-])?P(?:(\d+)W|(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?)$",
    )
    .expect("duration regex is valid")
});

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IsoDuration {
    pub negative: bool,
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl IsoDuration {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let caps = DURATION_RE
            .captures(s)
            .ok_or_else(|| CyclerunError::cycling(format!("invalid ISO 8601 duration '{s}'")))?;
        if s.ends_with('T') || s.trim_start_matches(['+', '-']) == "P" {
            return Err(CyclerunError::cycling(format!(
                "invalid ISO 8601 duration '{s}': no components"
            )));
        }

        let field = |i: usize| -> Result<u32> {
            match caps.get(i) {
                Some(m) => m.as_str().parse::<u32>().map_err(|e| {
                    CyclerunError::cycling(format!("duration component in '{s}': {e}"))
                }),
                None => Ok(0),
            }
        };

        Ok(Self {
            negative: caps.get(1).is_some_and(|m| m.as_str() == "-"),
            weeks: field(2)?,
            years: field(3)?,
            months: field(4)?,
            days: field(5)?,
            hours: field(6)?,
            minutes: field(7)?,
            seconds: field(8)?,
        })
    }

    pub fn from_seconds(secs: i64) -> Self {
        let negative = secs < 0;
        let mut rem = secs.unsigned_abs();
        let days = rem / SECS_PER_DAY as u64;
        rem %= SECS_PER_DAY as u64;
        let hours = rem / SECS_PER_HOUR as u64;
        rem %= SECS_PER_HOUR as u64;
        Self {
            negative,
            days: days as u32,
            hours: hours as u32,
            minutes: (rem / SECS_PER_MINUTE as u64) as u32,
            seconds: (rem % SECS_PER_MINUTE as u64) as u32,
            ..Self::default()
        }
    }

    pub fn is_null(&self) -> bool {
        self.years == 0
            && self.months == 0
            && self.weeks == 0
            && self.days == 0
            && self.hours == 0
            && self.minutes == 0
            && self.seconds == 0
    }

    pub fn negated(&self) -> Self {
        Self {
            negative: !self.negative,
            ..*self
        }
    }

    /// Multiply every component by `n`.
    pub fn scaled(&self, n: u32) -> Option<Self> {
        Some(Self {
            negative: self.negative,
            years: self.years.checked_mul(n)?,
            months: self.months.checked_mul(n)?,
            weeks: self.weeks.checked_mul(n)?,
            days: self.days.checked_mul(n)?,
            hours: self.hours.checked_mul(n)?,
            minutes: self.minutes.checked_mul(n)?,
            seconds: self.seconds.checked_mul(n)?,
        })
    }

    fn calendar_months(&self) -> u32 {
        self.years.saturating_mul(12).saturating_add(self.months)
    }

    fn unsigned_exact_seconds(&self) -> i64 {
        i64::from(self.weeks) * 7 * SECS_PER_DAY
            + i64::from(self.days) * SECS_PER_DAY
            + i64::from(self.hours) * SECS_PER_HOUR
            + i64::from(self.minutes) * SECS_PER_MINUTE
            + i64::from(self.seconds)
    }

    fn sign(&self) -> i64 {
        if self.negative { -1 } else { 1 }
    }

    /// Signed length in seconds when the duration has no calendar units.
    pub fn exact_seconds(&self) -> Option<i64> {
        (self.calendar_months() == 0).then(|| self.sign() * self.unsigned_exact_seconds())
    }

    /// Signed length in seconds, counting a month as its mean length.
    pub fn approx_seconds(&self) -> i64 {
        let month_secs = 2_629_746_i64;
        self.sign()
            * (i64::from(self.calendar_months()) * month_secs + self.unsigned_exact_seconds())
    }

    /// Wall-clock length, used for timers. Calendar units use their mean length.
    pub fn to_time_delta(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.approx_seconds()).unwrap_or(TimeDelta::MAX)
    }

    pub fn add_to(&self, dt: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let months = Months::new(self.calendar_months());
        let exact = TimeDelta::try_seconds(self.unsigned_exact_seconds())?;
        if self.negative {
            dt.checked_sub_signed(exact)?.checked_sub_months(months)
        } else {
            dt.checked_add_months(months)?.checked_add_signed(exact)
        }
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str("P")?;
        if self.is_null() {
            return f.write_str("T0S");
        }
        if self.weeks > 0
            && self.years == 0
            && self.months == 0
            && self.days == 0
            && self.hours == 0
            && self.minutes == 0
            && self.seconds == 0
        {
            return write!(f, "{}W", self.weeks);
        }
        let days = self.days + self.weeks * 7;
        for (value, unit) in [(self.years, 'Y'), (self.months, 'M'), (days, 'D')] {
            if value > 0 {
                write!(f, "{value}{unit}")?;
            }
        }
        if self.hours > 0 || self.minutes > 0 || self.seconds > 0 {
            f.write_str("T")?;
            for (value, unit) in [(self.hours, 'H'), (self.minutes, 'M'), (self.seconds, 'S')] {
                if value > 0 {
                    write!(f, "{value}{unit}")?;
                }
            }
        }
        Ok(())
    }
}

/// Parse a delay list such as `"3*PT1S, PT1M"` into individual durations.
pub fn parse_duration_list(s: &str) -> Result<Vec<IsoDuration>> {
    let mut out = Vec::new();
    for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        match item.split_once('*') {
            Some((count, dur)) => {
                let count: usize = count.trim().parse().map_err(|_| {
                    CyclerunError::cycling(format!("invalid repeat count in '{item}'"))
                })?;
                let dur = IsoDuration::parse(dur)?;
                out.extend(std::iter::repeat_n(dur, count));
            }
            None => out.push(IsoDuration::parse(item)?),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_mixed_components() {
        let d = IsoDuration::parse("P1Y2M3DT4H5M6S").unwrap();
        assert_eq!((d.years, d.months, d.days), (1, 2, 3));
        assert_eq!((d.hours, d.minutes, d.seconds), (4, 5, 6));
        assert_eq!(d.to_string(), "P1Y2M3DT4H5M6S");
    }

    #[test]
    fn rejects_empty_durations() {
        assert!(IsoDuration::parse("P").is_err());
        assert!(IsoDuration::parse("PT").is_err());
        assert!(IsoDuration::parse("1D").is_err());
    }

    #[test]
    fn month_addition_clamps_to_month_end() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let jan31 = tz.with_ymd_and_hms(2021, 1, 31, 0, 0, 0).unwrap();
        let feb = IsoDuration::parse("P1M").unwrap().add_to(jan31).unwrap();
        assert_eq!(feb, tz.with_ymd_and_hms(2021, 2, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn negative_durations_subtract() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let t = tz.with_ymd_and_hms(2021, 3, 1, 6, 0, 0).unwrap();
        let back = IsoDuration::parse("-PT6H").unwrap().add_to(t).unwrap();
        assert_eq!(back, tz.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn expands_repeated_delays() {
        let delays = parse_duration_list("3*PT1S, PT1M").unwrap();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[3].exact_seconds(), Some(60));
        assert!(parse_duration_list("").unwrap().is_empty());
    }
}
