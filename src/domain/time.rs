use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

pub const SLOT_MINUTES: u32 = 15;
const MINUTES_PER_DAY: i64 = 24 * 60;
const DEFAULT_TIMELINE_START: (u32, u32) = (6, 0);
const DEFAULT_TIMELINE_END: (u32, u32) = (22, 0);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("invalid clock time '{0}': expected HH:mm or h:mm AM/PM")]
    InvalidFormat(String),
}

/// Wall-clock time of day at minute precision, rendered as 24-hour `HH:mm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(NaiveTime);

impl ClockTime {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn midnight() -> Self {
        Self(NaiveTime::MIN)
    }

    pub fn hour(self) -> u32 {
        self.0.hour()
    }

    pub fn minute(self) -> u32 {
        self.0.minute()
    }

    pub fn minutes_since_midnight(self) -> u32 {
        self.0.hour() * 60 + self.0.minute()
    }

    fn from_minutes_since_midnight(minutes: i64) -> Self {
        let wrapped = minutes.rem_euclid(MINUTES_PER_DAY) as u32;
        Self(NaiveTime::from_hms_opt(wrapped / 60, wrapped % 60, 0).unwrap_or(NaiveTime::MIN))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for ClockTime {
    type Err = TimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_clock_time(value)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = TimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_clock_time(&value)
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

/// Parses `HH:mm` (24-hour) or `h:mm AM/PM` (12-hour, normalized to 24-hour).
pub fn parse_clock_time(value: &str) -> Result<ClockTime, TimeError> {
    let invalid = || TimeError::InvalidFormat(value.to_string());
    let trimmed = value.trim();

    let upper = trimmed.to_ascii_uppercase();
    let (clock, meridiem) = if let Some(rest) = upper.strip_suffix("AM") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = upper.strip_suffix("PM") {
        (rest.trim_end(), Some(true))
    } else {
        (upper.as_str(), None)
    };

    let mut split = clock.split(':');
    let (Some(hour_str), Some(minute_str), None) = (split.next(), split.next(), split.next())
    else {
        return Err(invalid());
    };
    if hour_str.is_empty()
        || hour_str.len() > 2
        || minute_str.len() != 2
        || !hour_str.bytes().all(|byte| byte.is_ascii_digit())
        || !minute_str.bytes().all(|byte| byte.is_ascii_digit())
    {
        return Err(invalid());
    }

    let hour = hour_str.parse::<u32>().map_err(|_| invalid())?;
    let minute = minute_str.parse::<u32>().map_err(|_| invalid())?;
    let hour = match meridiem {
        None => hour,
        Some(is_pm) => {
            if !(1..=12).contains(&hour) {
                return Err(invalid());
            }
            match (hour, is_pm) {
                (12, false) => 0,
                (12, true) => 12,
                (hour, true) => hour + 12,
                (hour, false) => hour,
            }
        }
    };

    ClockTime::from_hm(hour, minute).ok_or_else(invalid)
}

/// Minutes from `start` to `end`; zero when `end` is not after `start`.
pub fn duration_minutes(start: ClockTime, end: ClockTime) -> u32 {
    end.minutes_since_midnight()
        .saturating_sub(start.minutes_since_midnight())
}

/// Adds (or subtracts) minutes without rounding, wrapping within a 24-hour clock.
pub fn add_minutes(time: ClockTime, minutes: i64) -> ClockTime {
    ClockTime::from_minutes_since_midnight(time.minutes_since_midnight() as i64 + minutes)
}

/// Number of 15-minute blocks needed to cover `minutes`, never less than one.
pub fn to_duration_blocks(minutes: u32) -> u32 {
    minutes.div_ceil(SLOT_MINUTES).max(1)
}

/// Rounds an arbitrary duration to the nearest whole block (minimum one block).
pub fn round_to_block(minutes: u32) -> u32 {
    let blocks = (minutes + SLOT_MINUTES / 2) / SLOT_MINUTES;
    blocks.max(1) * SLOT_MINUTES
}

/// True when a span of `minutes` starting at `start` ends before midnight. An end of
/// exactly 24:00 would read back as 00:00 and a zero duration.
pub fn fits_in_day(start: ClockTime, minutes: u32) -> bool {
    (start.minutes_since_midnight() as i64 + minutes as i64) < MINUTES_PER_DAY
}

pub fn default_slot_sequence() -> Vec<ClockTime> {
    let (start_hour, start_minute) = DEFAULT_TIMELINE_START;
    let (end_hour, end_minute) = DEFAULT_TIMELINE_END;
    let start = ClockTime::from_hm(start_hour, start_minute).unwrap_or_else(ClockTime::midnight);
    let end = ClockTime::from_hm(end_hour, end_minute).unwrap_or_else(ClockTime::midnight);
    slot_sequence(start, end)
}

/// Every 15-minute slot from `start` through `end`, both inclusive.
pub fn slot_sequence(start: ClockTime, end: ClockTime) -> Vec<ClockTime> {
    let first = start.minutes_since_midnight();
    let last = end.minutes_since_midnight();
    (first..=last)
        .step_by(SLOT_MINUTES as usize)
        .map(|minutes| ClockTime::from_minutes_since_midnight(minutes as i64))
        .collect()
}

/// Visible timeline slots. Unparseable or inverted bounds fall back to 06:00-22:00.
pub fn generate_slot_sequence(start: &str, end: &str) -> Vec<ClockTime> {
    match (parse_clock_time(start), parse_clock_time(end)) {
        (Ok(start), Ok(end)) if start <= end => slot_sequence(start, end),
        (Ok(_), Ok(_)) => {
            warn!(start, end, "timeline end precedes start; using default timeline");
            default_slot_sequence()
        }
        (Err(error), _) | (_, Err(error)) => {
            warn!(%error, "invalid timeline bounds; using default timeline");
            default_slot_sequence()
        }
    }
}
