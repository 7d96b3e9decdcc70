//! PostgreSQL implementations of the store ports

use async_trait::async_trait;
use chrono::NaiveDate;
use common::error::{DatabaseError, DatabaseResult};
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::{
    AttendanceRepository, MealRepository, ReservationRepository, StaffRepository, TogglePlanner,
    UserRepository,
};
use crate::models::{
    Attendance, DateRange, InsertOutcome, Meal, MealId, NewAttendance, Reservation, Slot,
    StaffAccount, StaffRole, TogglePlan, User, UserId,
};

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> DatabaseResult<()> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))
}

/// Member repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get_user(&self, id: UserId) -> DatabaseResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, pin_hash, pin_set_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list_user_ids(&self) -> DatabaseResult<BTreeSet<UserId>> {
        let ids: Vec<UserId> = sqlx::query_scalar("SELECT id FROM users")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.into_iter().collect())
    }
}

/// Meal repository
#[derive(Clone)]
pub struct PgMealRepository {
    pool: PgPool,
}

impl PgMealRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MealRepository for PgMealRepository {
    async fn list_meals(&self) -> DatabaseResult<Vec<Meal>> {
        let meals = sqlx::query_as::<_, Meal>(
            r#"
            SELECT id, name, scheduled_time
            FROM meals
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(meals)
    }

    async fn get_meal(&self, id: MealId) -> DatabaseResult<Option<Meal>> {
        let meal = sqlx::query_as::<_, Meal>(
            r#"
            SELECT id, name, scheduled_time
            FROM meals
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(meal)
    }
}

/// Reservation (opt-out) repository
#[derive(Clone)]
pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn find(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT id, user_id, meal_id, date, created_at
            FROM reservations
            WHERE user_id = $1 AND meal_id = $2 AND date = $3
            "#,
        )
        .bind(user_id)
        .bind(meal_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reservation)
    }

    async fn find_by_user(
        &self,
        user_id: UserId,
        range: &DateRange,
    ) -> DatabaseResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT id, user_id, meal_id, date, created_at
            FROM reservations
            WHERE user_id = $1 AND date BETWEEN $2 AND $3
            ORDER BY date, meal_id
            "#,
        )
        .bind(user_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }

    async fn find_by_date(&self, date: NaiveDate) -> DatabaseResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT id, user_id, meal_id, date, created_at
            FROM reservations
            WHERE date = $1
            ORDER BY meal_id, user_id
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }

    async fn find_in_range(&self, range: &DateRange) -> DatabaseResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT id, user_id, meal_id, date, created_at
            FROM reservations
            WHERE date BETWEEN $1 AND $2
            ORDER BY date, meal_id, user_id
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }

    async fn insert(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Reservation> {
        let inserted = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (user_id, meal_id, date)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, meal_id, date) DO NOTHING
            RETURNING id, user_id, meal_id, date, created_at
            "#,
        )
        .bind(user_id)
        .bind(meal_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(reservation) => Ok(reservation),
            None => self.find(user_id, meal_id, date).await?.ok_or_else(|| {
                DatabaseError::Unavailable(format!(
                    "reservation ({}, {}, {}) vanished after conflicting insert",
                    user_id, meal_id, date
                ))
            }),
        }
    }

    async fn delete(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM reservations
            WHERE user_id = $1 AND meal_id = $2 AND date = $3
            "#,
        )
        .bind(user_id)
        .bind(meal_id)
        .bind(date)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reconcile(
        &self,
        user_id: UserId,
        range: &DateRange,
        planner: &TogglePlanner<'_>,
    ) -> DatabaseResult<TogglePlan> {
        // Dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent reconciles for the same member
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let canceled: BTreeSet<Slot> = sqlx::query_as::<_, (MealId, NaiveDate)>(
            r#"
            SELECT meal_id, date
            FROM reservations
            WHERE user_id = $1 AND date BETWEEN $2 AND $3
            "#,
        )
        .bind(user_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(meal_id, date)| Slot::new(date, meal_id))
        .collect();

        let plan = planner(&canceled);
        if plan.batch.is_empty() {
            tx.rollback().await?;
            return Ok(plan);
        }

        for slot in &plan.batch.deletes {
            sqlx::query(
                r#"
                DELETE FROM reservations
                WHERE user_id = $1 AND meal_id = $2 AND date = $3
                "#,
            )
            .bind(user_id)
            .bind(slot.meal_id)
            .bind(slot.date)
            .execute(&mut *tx)
            .await?;
        }

        for slot in &plan.batch.inserts {
            sqlx::query(
                r#"
                INSERT INTO reservations (user_id, meal_id, date)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id, meal_id, date) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(slot.meal_id)
            .bind(slot.date)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Committed reservation batch for user {}: {} inserts, {} deletes",
            user_id,
            plan.batch.inserts.len(),
            plan.batch.deletes.len()
        );
        Ok(plan)
    }
}

/// Attendance repository
#[derive(Clone)]
pub struct PgAttendanceRepository {
    pool: PgPool,
}

impl PgAttendanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceRepository for PgAttendanceRepository {
    async fn find(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Option<Attendance>> {
        let attendance = sqlx::query_as::<_, Attendance>(
            r#"
            SELECT id, user_id, meal_id, date, validated_at, source
            FROM attendance
            WHERE user_id = $1 AND meal_id = $2 AND date = $3
            "#,
        )
        .bind(user_id)
        .bind(meal_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attendance)
    }

    async fn find_by_date(&self, date: NaiveDate) -> DatabaseResult<Vec<Attendance>> {
        let rows = sqlx::query_as::<_, Attendance>(
            r#"
            SELECT id, user_id, meal_id, date, validated_at, source
            FROM attendance
            WHERE date = $1
            ORDER BY meal_id, user_id
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_in_range(&self, range: &DateRange) -> DatabaseResult<Vec<Attendance>> {
        let rows = sqlx::query_as::<_, Attendance>(
            r#"
            SELECT id, user_id, meal_id, date, validated_at, source
            FROM attendance
            WHERE date BETWEEN $1 AND $2
            ORDER BY date, meal_id, user_id
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert(&self, attendance: &NewAttendance) -> DatabaseResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance (user_id, meal_id, date, validated_at, source)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, meal_id, date) DO NOTHING
            "#,
        )
        .bind(attendance.user_id)
        .bind(attendance.meal_id)
        .bind(attendance.date)
        .bind(attendance.validated_at)
        .bind(&attendance.source)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyPresent)
        }
    }
}

/// Staff account repository
#[derive(Clone)]
pub struct PgStaffRepository {
    pool: PgPool,
}

impl PgStaffRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StaffRepository for PgStaffRepository {
    async fn find_admin(&self, username: &str) -> DatabaseResult<Option<StaffAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, password_hash
            FROM admins
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(StaffAccount {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                password_hash: row.try_get("password_hash")?,
                role: StaffRole::Admin,
                active: true,
            })),
            None => Ok(None),
        }
    }

    async fn find_validator(&self, username: &str) -> DatabaseResult<Option<StaffAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, password_hash, active
            FROM validators
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(StaffAccount {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                password_hash: row.try_get("password_hash")?,
                role: StaffRole::Validator,
                active: row.try_get("active")?,
            })),
            None => Ok(None),
        }
    }
}
