//! Alignment of delivery instants to subscription calendars.

use crate::domain::{MINUTES_PER_DAY, ScheduleData};
use crate::{Error, Result};

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_DAY: i64 = MINUTES_PER_DAY * SECONDS_PER_MINUTE;

/// Days scanned forward looking for an open window.
const LOOKAHEAD_DAYS: i64 = 8;

/// The earliest instant at or after `candidate` (Unix seconds) that the
/// schedule allows.
///
/// An instant inside an open window, boundaries included, is returned as is.
/// Otherwise the start of the next enabled window is returned. Errors when
/// `days` is neither empty nor seven long, or when no window opens within the
/// lookahead; callers keep `candidate` in that case.
pub fn next_allowed(schedule: &ScheduleData, candidate: i64) -> Result<i64> {
    let days = &schedule.days;
    if days.is_empty() {
        return Ok(candidate);
    }
    if days.len() != 7 {
        return Err(Error::InvalidSchedule(format!(
            "schedule has {} days, expected 0 or 7",
            days.len()
        )));
    }

    let begin = schedule.start_offset * SECONDS_PER_MINUTE;
    let mut end = schedule.end_offset * SECONDS_PER_MINUTE;
    if end < begin {
        end += SECONDS_PER_DAY;
    }
    let tz_offset = schedule.timezone_offset * SECONDS_PER_MINUTE;

    let local = (candidate - tz_offset).div_euclid(SECONDS_PER_MINUTE) * SECONDS_PER_MINUTE;
    let local_day = local.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY;
    let weekday = weekday_from_monday(local_day);

    if days[weekday].enabled && local >= local_day + begin && local <= local_day + end {
        return Ok(candidate);
    }

    for i in 0..LOOKAHEAD_DAYS {
        let day_begin = local_day + i * SECONDS_PER_DAY;
        if local > day_begin + begin {
            continue;
        }
        if !days[(weekday + i as usize) % 7].enabled {
            continue;
        }
        return Ok(day_begin + begin + tz_offset);
    }

    Err(Error::InvalidSchedule(
        "no enabled delivery window in the next week".to_string(),
    ))
}

/// Weekday of a Unix-seconds day start, Monday = 0.
fn weekday_from_monday(day_start: i64) -> usize {
    // 1970-01-01 was a Thursday.
    (day_start.div_euclid(SECONDS_PER_DAY) + 3).rem_euclid(7) as usize
}
