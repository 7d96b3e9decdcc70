//! Domain models for meals, members, reservations and attendance

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub mod attendance;
pub mod meal;
pub mod reservation;
pub mod staff;
pub mod user;

// Re-export for convenience
pub use attendance::{Attendance, InsertOutcome, KIOSK_SOURCE, NewAttendance};
pub use meal::Meal;
pub use reservation::{Reservation, ReservationBatch, TogglePlan};
pub use staff::{StaffAccount, StaffRole};
pub use user::User;

/// Organisation-assigned member number (badge / ID card)
pub type UserId = i16;

/// Meal identifier
pub type MealId = i16;

/// One cell of the reservation grid: a meal on a given calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub meal_id: MealId,
}

impl Slot {
    pub fn new(date: NaiveDate, meal_id: MealId) -> Self {
        Self { date, meal_id }
    }
}

/// Inclusive span of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting an end that precedes the start
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CoreError> {
        if end < start {
            return Err(CoreError::Validation(format!(
                "range end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// A range covering exactly one day
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// A range of `days` consecutive days beginning at `start` (at least one)
    pub fn starting_at(start: NaiveDate, days: u32) -> Self {
        let span = u64::from(days.max(1) - 1);
        let end = start
            .checked_add_days(Days::new(span))
            .unwrap_or(NaiveDate::MAX);
        Self { start, end }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Number of days in the range, both ends included
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}
