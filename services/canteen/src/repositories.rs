//! Store ports consumed by the engines
//!
//! Each port is a narrow async trait so the engines can run against
//! PostgreSQL in production and the in-memory store in tests. Uniqueness of
//! reservations and attendance per (user, meal, day) is the store's job, not
//! a read-then-check in the engines.

use async_trait::async_trait;
use chrono::NaiveDate;
use common::error::DatabaseResult;
use std::collections::BTreeSet;

use crate::models::{
    Attendance, DateRange, InsertOutcome, Meal, MealId, NewAttendance, Reservation, Slot,
    StaffAccount, TogglePlan, User, UserId,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{
    PgAttendanceRepository, PgMealRepository, PgReservationRepository, PgStaffRepository,
    PgUserRepository, run_migrations,
};

/// Turns a member's current opt-outs into the plan to apply
pub type TogglePlanner<'a> = dyn Fn(&BTreeSet<Slot>) -> TogglePlan + Send + Sync + 'a;

/// Member lookup
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, id: UserId) -> DatabaseResult<Option<User>>;

    async fn list_user_ids(&self) -> DatabaseResult<BTreeSet<UserId>>;
}

/// Meal lookup
#[async_trait]
pub trait MealRepository: Send + Sync {
    /// All meals ordered by id
    async fn list_meals(&self) -> DatabaseResult<Vec<Meal>>;

    async fn get_meal(&self, id: MealId) -> DatabaseResult<Option<Meal>>;
}

/// Opt-out records
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn find(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Option<Reservation>>;

    async fn find_by_user(
        &self,
        user_id: UserId,
        range: &DateRange,
    ) -> DatabaseResult<Vec<Reservation>>;

    async fn find_by_date(&self, date: NaiveDate) -> DatabaseResult<Vec<Reservation>>;

    async fn find_in_range(&self, range: &DateRange) -> DatabaseResult<Vec<Reservation>>;

    /// Insert one opt-out; an existing row for the same slot is kept
    async fn insert(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Reservation>;

    /// Delete one opt-out, returning whether a row existed
    async fn delete(&self, user_id: UserId, meal_id: MealId, date: NaiveDate)
    -> DatabaseResult<bool>;

    /// Read the member's opt-outs within `range`, plan against them and apply
    /// the planned batch in one transaction that holds the member's lock, so
    /// concurrent calls for one member take effect one after the other.
    /// Either the whole batch is visible afterwards or none of it is.
    async fn reconcile(
        &self,
        user_id: UserId,
        range: &DateRange,
        planner: &TogglePlanner<'_>,
    ) -> DatabaseResult<TogglePlan>;
}

/// Attendance records
#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    async fn find(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Option<Attendance>>;

    async fn find_by_date(&self, date: NaiveDate) -> DatabaseResult<Vec<Attendance>>;

    async fn find_in_range(&self, range: &DateRange) -> DatabaseResult<Vec<Attendance>>;

    /// Insert unless a row for the same (user, meal, day) exists
    async fn insert(&self, attendance: &NewAttendance) -> DatabaseResult<InsertOutcome>;
}

/// Staff accounts for the kiosk and the dashboard
#[async_trait]
pub trait StaffRepository: Send + Sync {
    async fn find_admin(&self, username: &str) -> DatabaseResult<Option<StaffAccount>>;

    async fn find_validator(&self, username: &str) -> DatabaseResult<Option<StaffAccount>>;
}
