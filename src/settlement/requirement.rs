// Attendance requirement calculator
//
// Counts the days in a range on which a participant is expected to check in.
// Pure and deterministic: same inputs, same count.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Utc};

use crate::ledger::models::{DailyWindow, WeekdaySet};

/// Number of qualifying days in `[start, end]` (calendar days, both ends inclusive).
///
/// A day qualifies when its weekday is required and, if a daily window is set,
/// `start`'s time of day falls strictly before the window opens.
///
/// Returns 0 when `start` is after `end`, when no weekday is required, or when
/// the window closes at or before it opens.
pub fn required_check_ins(
    start: NaiveDateTime,
    end: NaiveDateTime,
    weekdays: WeekdaySet,
    window: Option<DailyWindow>,
) -> u32 {
    if start > end || weekdays.is_empty() {
        return 0;
    }

    let joins_before_window = match window {
        Some(window) if !window.is_consistent() => return 0,
        Some(window) => start.time() < window.start,
        None => true,
    };

    let last_day = end.date();
    let mut count = 0;

    for day in start.date().iter_days() {
        if day > last_day {
            break;
        }
        if weekdays.contains(day.weekday()) && joins_before_window {
            count += 1;
        }
    }

    count
}

/// Convert a stored UTC timestamp into the schedule's local wall-clock time
pub fn to_schedule_time(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    at.with_timezone(&offset).naive_local()
}
