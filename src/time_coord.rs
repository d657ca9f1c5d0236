//! Encoded time coordinates: numeric offsets from an epoch under a calendar.

use std::{collections::HashMap, fmt};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use crate::error::{ClimateError, Result};

pub const DEFAULT_TIME_UNITS: &str = "days since 1950-01-01 00:00:00";
pub const DEFAULT_CALENDAR: &str = "gregorian";

const MILLIS_PER_SECOND: i64 = 1_000;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "days" | "day" | "d" => Some(TimeUnit::Days),
            "hours" | "hour" | "hrs" | "hr" | "h" => Some(TimeUnit::Hours),
            "minutes" | "minute" | "mins" | "min" => Some(TimeUnit::Minutes),
            "seconds" | "second" | "secs" | "sec" | "s" => Some(TimeUnit::Seconds),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Days => "days",
            TimeUnit::Hours => "hours",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Seconds => "seconds",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            TimeUnit::Days => SECONDS_PER_DAY,
            TimeUnit::Hours => 3_600,
            TimeUnit::Minutes => 60,
            TimeUnit::Seconds => 1,
        }
    }

    fn millis(&self) -> i64 {
        self.seconds() * MILLIS_PER_SECOND
    }
}

/// Calendar of a time coordinate. The CF names `gregorian`, `standard` and
/// `proleptic_gregorian` are all handled as the proleptic Gregorian calendar,
/// which matches the mixed calendar for every date after 1582-10-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    Gregorian,
}

impl Calendar {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gregorian" | "standard" | "proleptic_gregorian" => Ok(Calendar::Gregorian),
            _ => Err(ClimateError::UnsupportedCalendar(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Calendar::Gregorian => "gregorian",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeEncoding {
    unit: TimeUnit,
    epoch: NaiveDateTime,
    calendar: Calendar,
}

impl TimeEncoding {
    pub fn new(unit: TimeUnit, epoch: NaiveDateTime, calendar: Calendar) -> Self {
        TimeEncoding {
            unit,
            epoch,
            calendar,
        }
    }

    /// Parses CF style units such as `days since 1900-01-01 00:00:00`.
    pub fn parse(units: &str, calendar: &str) -> Result<Self> {
        let invalid = || ClimateError::InvalidTimeUnits(units.to_string());

        let (unit, since) = units.trim().split_once(" since ").ok_or_else(invalid)?;
        let unit = TimeUnit::from_str(unit.trim()).ok_or_else(invalid)?;
        let epoch = parse_epoch(since.trim()).ok_or_else(invalid)?;
        let calendar = Calendar::parse(calendar)?;

        Ok(TimeEncoding::new(unit, epoch, calendar))
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    /// The units attribute, e.g. `days since 1950-01-01 00:00:00`.
    pub fn units(&self) -> String {
        format!(
            "{} since {}",
            self.unit.as_str(),
            self.epoch.format("%Y-%m-%d %H:%M:%S")
        )
    }

    /// Offset of `date` from the epoch. Exact for whole milliseconds, so whole
    /// days encode to whole numbers.
    pub fn encode(&self, date: NaiveDateTime) -> f64 {
        let millis = (date - self.epoch).num_milliseconds();
        millis as f64 / self.unit.millis() as f64
    }

    pub fn decode(&self, value: f64) -> Result<NaiveDateTime> {
        let out_of_range = || {
            ClimateError::DateOutOfRange(format!("{} {}", value, self.units()))
        };

        if !value.is_finite() {
            return Err(out_of_range());
        }
        let millis = (value * self.unit.millis() as f64).round();
        if millis.abs() >= i64::MAX as f64 {
            return Err(out_of_range());
        }
        let delta = TimeDelta::try_milliseconds(millis as i64).ok_or_else(out_of_range)?;

        self.epoch.checked_add_signed(delta).ok_or_else(out_of_range)
    }

    pub fn decode_all(&self, values: &[f64]) -> Result<Vec<NaiveDateTime>> {
        values.iter().map(|value| self.decode(*value)).collect()
    }

    /// One day expressed in this encoding's unit.
    pub fn day_step(&self) -> f64 {
        SECONDS_PER_DAY as f64 / self.unit.seconds() as f64
    }

    /// Two coordinates can be compared or appended only when unit, epoch and
    /// calendar all agree.
    pub fn ensure_compatible(&self, other: &TimeEncoding) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(ClimateError::IncompatibleTime {
                left: self.to_string(),
                right: other.to_string(),
            })
        }
    }
}

impl Default for TimeEncoding {
    fn default() -> Self {
        let epoch = NaiveDate::from_ymd_opt(1950, 1, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or_default();

        TimeEncoding::new(TimeUnit::Days, epoch, Calendar::Gregorian)
    }
}

impl fmt::Display for TimeEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.units(), self.calendar.as_str())
    }
}

fn parse_epoch(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim_end_matches('Z').trim_end_matches(" UTC").trim();

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for format in FORMATS {
        if let Ok(epoch) = NaiveDateTime::parse_from_str(s, format) {
            return Some(epoch);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Exact lookup from an encoded time value to its first position in a series.
#[derive(Debug, Clone, Default)]
pub struct TimeIndex {
    positions: HashMap<u64, usize>,
}

impl TimeIndex {
    pub fn new(values: &[f64]) -> Self {
        let mut positions = HashMap::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            if !value.is_nan() {
                positions.entry(key(*value)).or_insert(i);
            }
        }

        TimeIndex { positions }
    }

    pub fn position(&self, value: f64) -> Option<usize> {
        if value.is_nan() {
            return None;
        }
        self.positions.get(&key(value)).copied()
    }
}

// -0.0 and 0.0 compare equal, so they share a key.
fn key(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

// -- Tests -------------------------------------------------------------------
