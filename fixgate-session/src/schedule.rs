/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session schedule.
//!
//! A schedule is either non-stop, a daily window (`StartTime`..`EndTime`) or
//! a weekly window (`StartDay StartTime`..`EndDay EndTime`). Windows whose
//! end precedes their start wrap over midnight or over the week end. Times
//! are UTC unless `UseLocalTime=Y`.

use crate::settings::{SettingsSection, keys};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday};
use fixgate_core::error::ConfigError;

const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_WEEK: i64 = 7 * SECS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    NonStop,
    Daily {
        start: NaiveTime,
        end: NaiveTime,
    },
    Weekly {
        start_day: Weekday,
        start: NaiveTime,
        end_day: Weekday,
        end: NaiveTime,
    },
}

/// When a session is allowed to be logged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSchedule {
    window: Window,
    use_local_time: bool,
}

impl SessionSchedule {
    /// A schedule that is always in session.
    #[must_use]
    pub const fn non_stop() -> Self {
        Self {
            window: Window::NonStop,
            use_local_time: false,
        }
    }

    /// A window repeating every day.
    #[must_use]
    pub const fn daily(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            window: Window::Daily { start, end },
            use_local_time: false,
        }
    }

    /// A window repeating every week.
    #[must_use]
    pub const fn weekly(start_day: Weekday, start: NaiveTime, end_day: Weekday, end: NaiveTime) -> Self {
        Self {
            window: Window::Weekly {
                start_day,
                start,
                end_day,
                end,
            },
            use_local_time: false,
        }
    }

    /// Interprets the window in the local time zone instead of UTC.
    #[must_use]
    pub const fn with_local_time(mut self, use_local_time: bool) -> Self {
        self.use_local_time = use_local_time;
        self
    }

    /// Builds the schedule from a settings section.
    ///
    /// `NonStopSession=Y` or the absence of both StartTime and EndTime gives
    /// a non-stop schedule. StartDay and EndDay must be given together.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingSetting` when only one bound of a pair is
    /// present and `ConfigError::InvalidValue` for malformed values.
    pub fn from_settings(section: &SettingsSection) -> Result<Self, ConfigError> {
        let use_local_time = section.get_bool_or(keys::USE_LOCAL_TIME, false)?;
        if section.get_bool_or(keys::NON_STOP_SESSION, false)?
            || !(section.has(keys::START_TIME) || section.has(keys::END_TIME))
        {
            return Ok(Self::non_stop().with_local_time(use_local_time));
        }

        let start = section.get_time(keys::START_TIME)?;
        let end = section.get_time(keys::END_TIME)?;
        let schedule = if section.has(keys::START_DAY) || section.has(keys::END_DAY) {
            Self::weekly(
                section.get_day(keys::START_DAY)?,
                start,
                section.get_day(keys::END_DAY)?,
                end,
            )
        } else {
            Self::daily(start, end)
        };
        Ok(schedule.with_local_time(use_local_time))
    }

    /// Returns true for a schedule without a window.
    #[inline]
    #[must_use]
    pub const fn is_non_stop(&self) -> bool {
        matches!(self.window, Window::NonStop)
    }

    /// Returns true if `now` falls inside a session window.
    #[must_use]
    pub fn is_session_time(&self, now: DateTime<Utc>) -> bool {
        self.window_start(now).is_some()
    }

    /// Returns true if both instants fall inside the same occurrence of the
    /// window.
    ///
    /// Non-stop schedules have a single endless window.
    #[must_use]
    pub fn is_same_session(&self, first: DateTime<Utc>, second: DateTime<Utc>) -> bool {
        if self.is_non_stop() {
            return true;
        }
        match (self.window_start(first), self.window_start(second)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn to_naive(&self, time: DateTime<Utc>) -> NaiveDateTime {
        if self.use_local_time {
            time.with_timezone(&Local).naive_local()
        } else {
            time.naive_utc()
        }
    }

    /// Start of the window containing `time`, in schedule-local naive time.
    fn window_start(&self, time: DateTime<Utc>) -> Option<NaiveDateTime> {
        let local = self.to_naive(time);
        let midnight = local.date().and_time(NaiveTime::MIN);
        match self.window {
            Window::NonStop => Some(NaiveDateTime::MIN),
            Window::Daily { start, end } => {
                let now = second_of_day(local.time());
                let (start, end) = (second_of_day(start), second_of_day(end));
                if !within(now, start, end) {
                    return None;
                }
                let mut begin = midnight + Duration::seconds(start);
                if begin > local {
                    begin -= Duration::days(1);
                }
                Some(begin)
            }
            Window::Weekly {
                start_day,
                start,
                end_day,
                end,
            } => {
                let weekday = i64::from(local.weekday().num_days_from_sunday());
                let now = weekday * SECS_PER_DAY + second_of_day(local.time());
                let start = second_of_week(start_day, start);
                let end = second_of_week(end_day, end);
                if !within(now, start, end) {
                    return None;
                }
                let sunday = midnight - Duration::days(weekday);
                let mut begin = sunday + Duration::seconds(start);
                if begin > local {
                    begin -= Duration::seconds(SECS_PER_WEEK);
                }
                Some(begin)
            }
        }
    }
}

impl Default for SessionSchedule {
    fn default() -> Self {
        Self::non_stop()
    }
}

#[inline]
fn second_of_day(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight())
}

#[inline]
fn second_of_week(day: Weekday, time: NaiveTime) -> i64 {
    i64::from(day.num_days_from_sunday()) * SECS_PER_DAY + second_of_day(time)
}

/// Inclusive range test that wraps when `end` is not after `start`.
#[inline]
fn within(now: i64, start: i64, end: i64) -> bool {
    if start < end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}
