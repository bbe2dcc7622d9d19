//! Recurring run window and the pure open/closed decision over it.
//!
//! A window that ends before it starts spans midnight. Such a window is
//! anchored to the weekday it starts on: Friday 22:00 - 06:00 is open on
//! Saturday 03:00 whenever Friday is allowed, whether or not Saturday is.

use chrono::{Datelike, Days, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Set of allowed weekdays, Monday = bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const ALL: Self = Self(0b111_1111);

    #[must_use]
    pub fn from_weekdays(days: impl IntoIterator<Item = Weekday>) -> Self {
        Self(days.into_iter().fold(0, |bits, day| bits | (1 << day.num_days_from_monday())))
    }

    /// Builds a set from 0-based day numbers (0 = Monday, 6 = Sunday).
    pub fn from_day_numbers(days: &[u8]) -> Result<Self, WindowError> {
        let mut bits = 0u8;
        for &day in days {
            if day > 6 {
                return Err(WindowError::InvalidWeekday(day));
            }
            bits |= 1 << day;
        }
        Ok(Self(bits))
    }

    #[must_use]
    pub const fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn day_numbers(self) -> Vec<u8> {
        (0..7).filter(|d| self.0 & (1 << d) != 0).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("run window start and end must differ (both {0})")]
    ZeroLength(NaiveTime),

    #[error("run window must allow at least one weekday")]
    NoDays,

    #[error("weekday number {0} is out of range 0..=6 (0 = Monday)")]
    InvalidWeekday(u8),
}

/// Configured run window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RunWindowSpec", into = "RunWindowSpec")]
pub struct RunWindow {
    start: NaiveTime,
    end: NaiveTime,
    days: WeekdaySet,
}

/// Serialized form of [`RunWindow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWindowSpec {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default = "all_day_numbers")]
    pub days_of_week: Vec<u8>,
}

fn all_day_numbers() -> Vec<u8> {
    (0..7).collect()
}

impl TryFrom<RunWindowSpec> for RunWindow {
    type Error = WindowError;

    fn try_from(spec: RunWindowSpec) -> Result<Self, Self::Error> {
        Self::new(spec.start_time, spec.end_time, WeekdaySet::from_day_numbers(&spec.days_of_week)?)
    }
}

impl From<RunWindow> for RunWindowSpec {
    fn from(window: RunWindow) -> Self {
        Self {
            start_time: window.start,
            end_time: window.end,
            days_of_week: window.days.day_numbers(),
        }
    }
}

impl RunWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, days: WeekdaySet) -> Result<Self, WindowError> {
        if start == end {
            return Err(WindowError::ZeroLength(start));
        }
        if days.is_empty() {
            return Err(WindowError::NoDays);
        }
        Ok(Self { start, end, days })
    }

    #[must_use]
    pub const fn start(&self) -> NaiveTime {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> NaiveTime {
        self.end
    }

    #[must_use]
    pub const fn days(&self) -> WeekdaySet {
        self.days
    }

    #[must_use]
    pub fn spans_midnight(&self) -> bool {
        self.end < self.start
    }
}

/// Whether work may proceed at `now`. No window means always open.
#[must_use]
pub fn is_open(now: NaiveDateTime, window: Option<&RunWindow>) -> bool {
    let Some(window) = window else {
        return true;
    };
    let time = now.time();
    let day = now.weekday();

    if !window.spans_midnight() {
        return window.days.contains(day) && window.start <= time && time <= window.end;
    }
    if time >= window.start {
        window.days.contains(day)
    } else if time <= window.end {
        // early-morning tail belongs to the window that started yesterday
        window.days.contains(day.pred())
    } else {
        false
    }
}

/// Exact time until the window next opens; zero when it is open now.
#[must_use]
pub fn time_until_open(now: NaiveDateTime, window: Option<&RunWindow>) -> Duration {
    let Some(window) = window else {
        return Duration::ZERO;
    };
    if is_open(now, Some(window)) {
        return Duration::ZERO;
    }

    // Every opening happens at `start` on an allowed day, so the next one is
    // at most a week away.
    for offset in 0..=7u64 {
        let Some(date) = now.date().checked_add_days(Days::new(offset)) else {
            break;
        };
        if !window.days.contains(date.weekday()) {
            continue;
        }
        let opens_at = date.and_time(window.start);
        if opens_at > now {
            return (opens_at - now).to_std().unwrap_or_default();
        }
    }
    Duration::ZERO
}
