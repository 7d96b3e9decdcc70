//! Meal timing policy
//!
//! Pure functions deciding whether the kiosk is open for a meal and whether a
//! (day, meal) slot is frozen for self-service changes. Every function takes
//! `now` explicitly: one request reads the clock once and passes the same
//! instant to every check it makes.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{config::PolicyConfig, models::Meal};

/// Combine a calendar day and a wall-clock time in `tz`.
///
/// Ambiguous local times (autumn DST fold) resolve to the earlier instant;
/// times inside a spring-forward gap are shifted past the gap.
pub fn meal_instant(tz: Tz, day: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = day.and_time(time);
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = naive + TimeDelta::hours(1);
            match tz.from_local_datetime(&shifted).earliest() {
                Some(dt) => dt,
                None => return Utc.from_utc_datetime(&naive),
            }
        }
    };
    local.with_timezone(&Utc)
}

/// True iff `now` lies in `[meal - before, meal + after]`
pub fn in_window(
    tz: Tz,
    meal_time: NaiveTime,
    day: NaiveDate,
    now: DateTime<Utc>,
    before: TimeDelta,
    after: TimeDelta,
) -> bool {
    let at = meal_instant(tz, day, meal_time);
    at - before <= now && now <= at + after
}

/// True iff the meal on `day` is less than `lock` away from `now`.
///
/// Past meals are always locked.
pub fn is_locked(
    tz: Tz,
    day: NaiveDate,
    meal_time: NaiveTime,
    now: DateTime<Utc>,
    lock: TimeDelta,
) -> bool {
    meal_instant(tz, day, meal_time) - now < lock
}

/// Policy bound to one deployment's configuration
#[derive(Debug, Clone, Copy)]
pub struct WindowPolicy {
    tz: Tz,
    before: TimeDelta,
    after: TimeDelta,
    lock: TimeDelta,
}

impl WindowPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            tz: config.timezone,
            before: TimeDelta::minutes(config.window_before_minutes),
            after: TimeDelta::minutes(config.window_after_minutes),
            lock: TimeDelta::hours(config.lock_hours),
        }
    }

    /// The organisation's calendar day at `now`
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    pub fn in_window(&self, meal_time: NaiveTime, day: NaiveDate, now: DateTime<Utc>) -> bool {
        in_window(self.tz, meal_time, day, now, self.before, self.after)
    }

    pub fn is_locked(&self, day: NaiveDate, meal_time: NaiveTime, now: DateTime<Utc>) -> bool {
        is_locked(self.tz, day, meal_time, now, self.lock)
    }

    /// First meal (in the given order, callers pass ascending id) whose
    /// window for today contains `now`
    pub fn active_meal<'a>(&self, meals: &'a [Meal], now: DateTime<Utc>) -> Option<&'a Meal> {
        let today = self.today(now);
        meals
            .iter()
            .find(|meal| self.in_window(meal.scheduled_time, today, now))
    }
}
