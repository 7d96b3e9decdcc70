//! Attendance statistics
//!
//! Expected diners for a (day, meal) are all members minus those who opted
//! out; absentees are the expected diners without an attendance row.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::CoreError,
    models::{DateRange, Meal, MealId, Slot, UserId},
    repositories::{AttendanceRepository, MealRepository, ReservationRepository, UserRepository},
};

/// Maximum number of members listed in a weekly report
pub const TOP_ABSENTEES_LIMIT: usize = 50;

/// Round to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `absent / expected` as a percentage with one decimal, 0.0 when nobody was expected
pub fn absence_rate(absent: usize, expected: usize) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    round1(absent as f64 / expected as f64 * 100.0)
}

/// The seven-day week starting on `week_start` that contains `anchor`
pub fn week_bounds(anchor: NaiveDate, week_start: Weekday) -> DateRange {
    let offset = (anchor.weekday().num_days_from_monday() + 7
        - week_start.num_days_from_monday())
        % 7;
    let start = anchor
        .checked_sub_days(Days::new(u64::from(offset)))
        .unwrap_or(NaiveDate::MIN);
    DateRange::starting_at(start, 7)
}

/// Per-meal figures for one day
#[derive(Debug, Clone, Serialize)]
pub struct MealStat {
    pub meal: Meal,
    pub total_users: usize,
    pub canceled: usize,
    pub present: usize,
    pub expected: usize,
    pub absences: usize,
    pub absence_rate: f64,
}

/// One opt-out row joined with its meal
#[derive(Debug, Clone, Serialize)]
pub struct CancellationEntry {
    pub user_id: UserId,
    pub meal_id: MealId,
    pub meal_name: String,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Dashboard for one day
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub day: NaiveDate,
    pub total_users: usize,
    pub meals: Vec<MealStat>,
    /// Ordered by meal id, then member
    pub cancellations: Vec<CancellationEntry>,
}

/// Members expected at a meal who did not show up
#[derive(Debug, Clone, Serialize)]
pub struct AbsenteeList {
    pub day: NaiveDate,
    pub meal: Meal,
    pub absent_users: Vec<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AbsenteeCount {
    pub user_id: UserId,
    pub absences: u32,
}

/// Per-meal sums over a week
#[derive(Debug, Clone, Serialize)]
pub struct MealTotals {
    pub meal: Meal,
    pub expected: usize,
    pub present: usize,
    pub absent: usize,
    pub absence_rate: f64,
}

/// Weekly report
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyReport {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    /// Members with at least one absence, most absences first
    pub top_absentees: Vec<AbsenteeCount>,
    pub per_meal: Vec<MealTotals>,
}

fn group_by_slot(rows: impl Iterator<Item = (Slot, UserId)>) -> HashMap<Slot, BTreeSet<UserId>> {
    let mut grouped: HashMap<Slot, BTreeSet<UserId>> = HashMap::new();
    for (slot, user_id) in rows {
        grouped.entry(slot).or_default().insert(user_id);
    }
    grouped
}

/// Statistics engine
#[derive(Clone)]
pub struct StatisticsEngine {
    users: Arc<dyn UserRepository>,
    meals: Arc<dyn MealRepository>,
    reservations: Arc<dyn ReservationRepository>,
    attendance: Arc<dyn AttendanceRepository>,
    week_start: Weekday,
}

impl StatisticsEngine {
    pub fn new(
        users: Arc<dyn UserRepository>,
        meals: Arc<dyn MealRepository>,
        reservations: Arc<dyn ReservationRepository>,
        attendance: Arc<dyn AttendanceRepository>,
        week_start: Weekday,
    ) -> Self {
        Self {
            users,
            meals,
            reservations,
            attendance,
            week_start,
        }
    }

    /// Per-meal counts for `day` plus the list of opt-outs
    pub async fn daily_stats(&self, day: NaiveDate) -> Result<DailyReport, CoreError> {
        let total_users = self.users.list_user_ids().await?.len();
        let meals = self.meals.list_meals().await?;
        let reservations = self.reservations.find_by_date(day).await?;
        let attendance = self.attendance.find_by_date(day).await?;

        let mut canceled: HashMap<MealId, usize> = HashMap::new();
        for reservation in &reservations {
            *canceled.entry(reservation.meal_id).or_default() += 1;
        }
        let mut present: HashMap<MealId, usize> = HashMap::new();
        for row in &attendance {
            *present.entry(row.meal_id).or_default() += 1;
        }

        let stats = meals
            .iter()
            .map(|meal| {
                let canceled = canceled.get(&meal.id).copied().unwrap_or(0);
                let present = present.get(&meal.id).copied().unwrap_or(0);
                let expected = total_users.saturating_sub(canceled);
                let absences = expected.saturating_sub(present);
                MealStat {
                    meal: meal.clone(),
                    total_users,
                    canceled,
                    present,
                    expected,
                    absences,
                    absence_rate: absence_rate(absences, expected),
                }
            })
            .collect();

        let names: HashMap<MealId, &str> = meals.iter().map(|m| (m.id, m.name.as_str())).collect();
        let mut cancellations: Vec<CancellationEntry> = reservations
            .iter()
            .filter_map(|r| {
                names.get(&r.meal_id).map(|name| CancellationEntry {
                    user_id: r.user_id,
                    meal_id: r.meal_id,
                    meal_name: name.to_string(),
                    date: r.date,
                    created_at: r.created_at,
                })
            })
            .collect();
        cancellations.sort_by_key(|c| (c.meal_id, c.user_id));

        Ok(DailyReport {
            day,
            total_users,
            meals: stats,
            cancellations,
        })
    }

    /// Members expected at `meal_id` on `day` with no attendance, ascending
    pub async fn absent_users(
        &self,
        day: NaiveDate,
        meal_id: MealId,
    ) -> Result<AbsenteeList, CoreError> {
        let meal = self
            .meals
            .get_meal(meal_id)
            .await?
            .ok_or_else(|| CoreError::meal_not_found(meal_id))?;

        let all_users = self.users.list_user_ids().await?;
        let canceled: BTreeSet<UserId> = self
            .reservations
            .find_by_date(day)
            .await?
            .iter()
            .filter(|r| r.meal_id == meal_id)
            .map(|r| r.user_id)
            .collect();
        let present: BTreeSet<UserId> = self
            .attendance
            .find_by_date(day)
            .await?
            .iter()
            .filter(|a| a.meal_id == meal_id)
            .map(|a| a.user_id)
            .collect();

        let absent_users = all_users
            .iter()
            .filter(|id| !canceled.contains(id) && !present.contains(id))
            .copied()
            .collect();

        Ok(AbsenteeList {
            day,
            meal,
            absent_users,
        })
    }

    /// Absences over the reporting week containing `anchor`
    pub async fn weekly_stats(&self, anchor: NaiveDate) -> Result<WeeklyReport, CoreError> {
        let week = week_bounds(anchor, self.week_start);
        let all_users = self.users.list_user_ids().await?;
        let meals = self.meals.list_meals().await?;

        let canceled = group_by_slot(
            self.reservations
                .find_in_range(&week)
                .await?
                .iter()
                .map(|r| (r.slot(), r.user_id)),
        );
        let present = group_by_slot(
            self.attendance
                .find_in_range(&week)
                .await?
                .iter()
                .map(|a| (Slot::new(a.date, a.meal_id), a.user_id)),
        );

        let empty = BTreeSet::new();
        let mut counts: BTreeMap<UserId, u32> = BTreeMap::new();
        let mut totals: Vec<MealTotals> = meals
            .iter()
            .map(|meal| MealTotals {
                meal: meal.clone(),
                expected: 0,
                present: 0,
                absent: 0,
                absence_rate: 0.0,
            })
            .collect();

        for day in week.days() {
            for total in totals.iter_mut() {
                let slot = Slot::new(day, total.meal.id);
                let canceled_here = canceled.get(&slot).unwrap_or(&empty);
                let present_here = present.get(&slot).unwrap_or(&empty);

                let expected: BTreeSet<UserId> =
                    all_users.difference(canceled_here).copied().collect();
                // Presence outside the expected set does not count
                let present_effective = expected.intersection(present_here).count();

                let mut absent = 0;
                for user_id in expected.difference(present_here) {
                    *counts.entry(*user_id).or_default() += 1;
                    absent += 1;
                }

                total.expected += expected.len();
                total.present += present_effective;
                total.absent += absent;
            }
        }

        for total in totals.iter_mut() {
            total.absence_rate = absence_rate(total.absent, total.expected);
        }

        let mut top_absentees: Vec<AbsenteeCount> = counts
            .into_iter()
            .filter(|(_, absences)| *absences > 0)
            .map(|(user_id, absences)| AbsenteeCount { user_id, absences })
            .collect();
        // Stable sort: ties stay in ascending member order
        top_absentees.sort_by(|a, b| b.absences.cmp(&a.absences));
        top_absentees.truncate(TOP_ABSENTEES_LIMIT);

        debug!(
            "Weekly report {}..{}: {} members with absences",
            week.start,
            week.end,
            top_absentees.len()
        );

        Ok(WeeklyReport {
            week_start: week.start,
            week_end: week.end,
            top_absentees,
            per_meal: totals,
        })
    }
}
